use std::fmt;

use thiserror::Error;

/// Which hook occupied a slot of a component's hook list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    State,
    Effect,
    Ref,
    Transition,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookKind::State => "use_state",
            HookKind::Effect => "use_effect",
            HookKind::Ref => "use_ref",
            HookKind::Transition => "use_transition",
        };
        f.write_str(name)
    }
}

/// Misuse of hooks detected while a component renders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("`{component}` called more hooks than in its previous render")]
    MoreHooks { component: String },
    #[error("`{component}` called {found} hooks but its previous render called {expected}")]
    FewerHooks {
        component: String,
        expected: usize,
        found: usize,
    },
    #[error("hook #{index} of `{component}` was {previous} and is now {requested}")]
    KindMismatch {
        component: String,
        index: usize,
        previous: HookKind,
        requested: HookKind,
    },
    #[error("hook #{index} of `{component}` changed its value type between renders")]
    TypeMismatch { component: String, index: usize },
}

/// Errors that abort a render walk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error("unsupported child descriptor: {0}")]
    UnsupportedChild(String),
    #[error("synchronous render walk finished with work remaining")]
    UnfinishedSyncWalk,
    #[error("root is no longer available")]
    RootUnavailable,
    #[error("root is busy rendering or committing")]
    RootBusy,
    #[error("component `{component}` failed: {message}")]
    Component { component: String, message: String },
}

impl RenderError {
    /// Error raised by user component code.
    pub fn component(component: &str, message: impl Into<String>) -> Self {
        RenderError::Component {
            component: component.to_owned(),
            message: message.into(),
        }
    }
}
