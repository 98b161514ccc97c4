use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type NodeId = String;
pub type EdgeId = String;

pub const MEDIA: &str = "media";
pub const GENRE: &str = "genre";
pub const ACTOR: &str = "actor";
pub const DIRECTOR: &str = "director";
pub const USER: &str = "user";
pub const MARKET: &str = "market";

/// Prefix shared by every edge type that records a user interaction.
pub const INTERACTION_PREFIX: &str = "user_";

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttributes {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedAttributes {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAttributes {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Typed core attributes of a node, tagged by node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "attributes", rename_all = "snake_case")]
pub enum NodeData {
    Media(MediaAttributes),
    Genre(NamedAttributes),
    Actor(NamedAttributes),
    Director(NamedAttributes),
    User(UserAttributes),
    Market(NamedAttributes),
    Custom(CustomAttributes),
}

impl NodeData {
    pub fn media(title: impl Into<String>) -> Self {
        NodeData::Media(MediaAttributes {
            title: title.into(),
            year: None,
            description: None,
        })
    }

    pub fn genre(name: impl Into<String>) -> Self {
        NodeData::Genre(NamedAttributes { name: name.into() })
    }

    pub fn actor(name: impl Into<String>) -> Self {
        NodeData::Actor(NamedAttributes { name: name.into() })
    }

    pub fn director(name: impl Into<String>) -> Self {
        NodeData::Director(NamedAttributes { name: name.into() })
    }

    pub fn user() -> Self {
        NodeData::User(UserAttributes::default())
    }

    pub fn type_tag(&self) -> &str {
        match self {
            NodeData::Media(_) => MEDIA,
            NodeData::Genre(_) => GENRE,
            NodeData::Actor(_) => ACTOR,
            NodeData::Director(_) => DIRECTOR,
            NodeData::User(_) => USER,
            NodeData::Market(_) => MARKET,
            NodeData::Custom(attrs) => &attrs.kind,
        }
    }

    /// Human readable label: the title for media, the name otherwise.
    pub fn label(&self) -> Option<&str> {
        match self {
            NodeData::Media(attrs) => Some(&attrs.title),
            NodeData::Genre(attrs)
            | NodeData::Actor(attrs)
            | NodeData::Director(attrs)
            | NodeData::Market(attrs) => Some(&attrs.name),
            NodeData::User(attrs) => attrs.name.as_deref(),
            NodeData::Custom(attrs) => attrs.name.as_deref(),
        }
    }

    fn typed_attribute(&self, key: &str) -> Option<Value> {
        match (self, key) {
            (NodeData::Media(attrs), "title") => Some(Value::from(attrs.title.clone())),
            (NodeData::Media(attrs), "year") => attrs.year.map(Value::from),
            (NodeData::Media(attrs), "description") => attrs.description.clone().map(Value::from),
            (NodeData::Custom(attrs), "kind") => Some(Value::from(attrs.kind.clone())),
            (_, "name") if !matches!(self, NodeData::Media(_)) => {
                self.label().map(|name| Value::from(name.to_string()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperNode {
    pub id: NodeId,
    pub data: NodeData,
    /// Open extension map for fields the typed attributes do not model.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl HyperNode {
    pub fn new(id: impl Into<NodeId>, data: NodeData) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            data,
            extensions: BTreeMap::new(),
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn with_created_at(mut self, millis: i64) -> Self {
        self.created_at = millis;
        self.updated_at = millis;
        self
    }

    pub fn node_type(&self) -> &str {
        self.data.type_tag()
    }

    /// Looks up a typed attribute first, then the extension map.
    pub fn attribute(&self, key: &str) -> Option<Value> {
        if key == "type" {
            return Some(Value::from(self.node_type().to_string()));
        }
        self.data
            .typed_attribute(key)
            .or_else(|| self.extensions.get(key).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperEdge {
    pub id: EdgeId,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub node_ids: Vec<NodeId>,
    pub weight: f32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
}

impl HyperEdge {
    pub fn new<I, S>(edge_type: impl Into<String>, node_ids: I, weight: f32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            edge_type: edge_type.into(),
            node_ids: node_ids.into_iter().map(Into::into).collect(),
            weight,
            metadata: BTreeMap::new(),
            embedding: None,
            created_at: now_millis(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EdgeId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_created_at(mut self, millis: i64) -> Self {
        self.created_at = millis;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_interaction(&self) -> bool {
        self.edge_type.starts_with(INTERACTION_PREFIX)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_ids.iter().any(|id| id == node_id)
    }
}
