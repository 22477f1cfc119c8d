use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference the presentation layer uses to find a page's renderer.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderHandle(String);

impl RenderHandle {
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderHandle({})", self.0)
    }
}

/// One step in a unit. Authored content; the engine never inspects `render`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub id: u32,
    pub title: String,
    pub render: RenderHandle,
}

impl PageDescriptor {
    #[must_use]
    pub fn new(id: u32, title: impl Into<String>, render: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            render: RenderHandle::new(render),
        }
    }
}
