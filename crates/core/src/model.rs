use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct LanguageModelError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(MessageError(message.into()))
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }

    pub fn as_inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

/// Text-generation provider bound to one model and one credential.
pub trait LanguageModel: Send + Sync {
    fn invoke_with_system(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<String, LanguageModelError>;

    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        self.invoke_with_system(prompt, None)
    }
}

impl<T: LanguageModel + ?Sized> LanguageModel for Box<T> {
    fn invoke_with_system(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        (**self).invoke_with_system(prompt, system_instruction)
    }
}

impl<T: LanguageModel + ?Sized> LanguageModel for std::sync::Arc<T> {
    fn invoke_with_system(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        (**self).invoke_with_system(prompt, system_instruction)
    }
}
