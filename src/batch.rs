/// An ordered group of text message bodies delivered to one consumer
/// invocation.
///
/// Order follows the upstream offset order of the source that built it. The
/// batch is not validated on construction: a well-behaved source never
/// delivers an empty one, and the consumer reports the case as an error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageBatch {
    messages: Vec<String>,
}

impl MessageBatch {
    pub fn new(messages: Vec<String>) -> Self {
        Self { messages }
    }

    pub fn first(&self) -> Option<&str> {
        self.messages.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for MessageBatch {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}
