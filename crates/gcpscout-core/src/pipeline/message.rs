use serde::Serialize;

use crate::errors::ResourceError;
use crate::finding::Finding;
use crate::record::{ImageRef, NpInput, ObjectRef, Resource, ResourceType};
use crate::secrets::SecretMatch;

/// Everything that can travel between links.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Message {
    Text(String),
    Resource(Resource),
    ResourceError(ResourceError),
    Finding(Finding),
    NpInput(NpInput),
    Object(ObjectRef),
    Image(ImageRef),
    SecretMatch(SecretMatch),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Text(_) => "text",
            Message::Resource(_) => "resource",
            Message::ResourceError(_) => "resource_error",
            Message::Finding(_) => "finding",
            Message::NpInput(_) => "np_input",
            Message::Object(_) => "object",
            Message::Image(_) => "image",
            Message::SecretMatch(_) => "secret_match",
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Message::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn resource_type(&self) -> Option<ResourceType> {
        self.as_resource().map(|r| r.resource_type)
    }
}

/// Typed extraction used by `recv_as`; non-matching messages yield `None`.
pub trait FromMessage: Sized {
    fn from_message(msg: Message) -> Option<Self>;
}

impl FromMessage for Message {
    fn from_message(msg: Message) -> Option<Self> {
        Some(msg)
    }
}

macro_rules! message_variant {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Message {
            fn from(v: $ty) -> Self {
                Message::$variant(v)
            }
        }

        impl FromMessage for $ty {
            fn from_message(msg: Message) -> Option<Self> {
                match msg {
                    Message::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

message_variant!(Text, String);
message_variant!(Resource, Resource);
message_variant!(ResourceError, ResourceError);
message_variant!(Finding, Finding);
message_variant!(NpInput, NpInput);
message_variant!(Object, ObjectRef);
message_variant!(Image, ImageRef);
message_variant!(SecretMatch, SecretMatch);

impl From<&str> for Message {
    fn from(v: &str) -> Self {
        Message::Text(v.to_string())
    }
}

/// Which inputs a link wants to see. Everything else is skipped by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepts {
    Any,
    Text,
    Resources(&'static [ResourceType]),
    Objects,
    NpInputs,
}

impl Accepts {
    pub fn matches(&self, msg: &Message) -> bool {
        match (self, msg) {
            (Accepts::Any, _) => true,
            (Accepts::Text, Message::Text(_)) => true,
            (Accepts::Resources(types), Message::Resource(r)) => types.contains(&r.resource_type),
            (Accepts::Objects, Message::Object(_)) => true,
            (Accepts::NpInputs, Message::NpInput(_)) => true,
            _ => false,
        }
    }
}

pub const PROJECTS: &[ResourceType] = &[ResourceType::Project];
pub const HIERARCHY: &[ResourceType] =
    &[ResourceType::Organization, ResourceType::Folder, ResourceType::Project];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Properties;

    #[test]
    fn test_accepts_filters_by_resource_type() {
        let project = Message::Resource(
            Resource::new("alpha", "organizations/1", ResourceType::Project, Properties::new())
                .unwrap(),
        );
        let bucket = Message::Resource(
            Resource::new("b", "alpha", ResourceType::Bucket, Properties::new()).unwrap(),
        );
        assert!(Accepts::Resources(PROJECTS).matches(&project));
        assert!(!Accepts::Resources(PROJECTS).matches(&bucket));
        assert!(!Accepts::Text.matches(&project));
        assert!(Accepts::Any.matches(&bucket));
    }

    #[test]
    fn test_from_message_skips_other_variants() {
        assert_eq!(String::from_message(Message::from("x")), Some("x".to_string()));
        assert_eq!(
            Resource::from_message(Message::Text("x".into())),
            None
        );
    }
}
