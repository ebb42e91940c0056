use std::borrow::Cow;

/// Per-root configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootOptions {
    /// Reject malformed child descriptors with an error instead of skipping
    /// them with a warning.
    pub strict: bool,
    /// Prefix for this root's log lines.
    pub label: Cow<'static, str>,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            strict: !cfg!(debug_assertions),
            label: Cow::Borrowed("root"),
        }
    }
}

impl RootOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }
}
