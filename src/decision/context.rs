use crate::completion::ChatMessage;

/// Ordered chat history shared by every decision. Append-only.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    messages: Vec<ChatMessage>,
}

impl ConversationContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let mut context = Self {
            messages: Vec::new(),
        };
        context.append_system_prelude(system_prompt.into());
        context
    }

    fn append_system_prelude(&mut self, prompt: String) {
        self.messages.push(ChatMessage::system(prompt));
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
