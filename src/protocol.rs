//! Wire types for the daemon socket.
//!
//! Newline-delimited JSON: one request object per line in, one response
//! object per line out.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Every method the daemon answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Ping,
    IndexFolder,
    Search,
    GetSummary,
    SaveSummary,
    RefineSummary,
    GetExpandedDetails,
    ListFolder,
}

impl Method {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "ping" => Self::Ping,
            "index_folder" => Self::IndexFolder,
            "search" => Self::Search,
            "get_summary" => Self::GetSummary,
            "save_summary" => Self::SaveSummary,
            "refine_summary" => Self::RefineSummary,
            "get_expanded_details" => Self::GetExpandedDetails,
            "list_folder" => Self::ListFolder,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Decode `params` into a method's parameter struct. A missing params
    /// object reads as empty.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.params {
            Value::Null => {
                serde_json::from_value(Value::Object(Default::default()))
            }
            params => T::deserialize(params),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Where a summary came from: `db` when stored, `ai` when generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Response {
    pub fn success(data: impl Serialize) -> Self {
        Self {
            status: Status::Success,
            message: None,
            data: serde_json::to_value(data).ok(),
            source: None,
        }
    }

    /// Success without a payload.
    pub fn ok() -> Self {
        Self {
            status: Status::Success,
            message: None,
            data: None,
            source: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            data: None,
            source: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathParams {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default, alias = "useAi")]
    pub use_ai: bool,
    #[serde(default, alias = "rootPath")]
    pub root_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveSummaryParams {
    pub path: String,
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefineParams {
    #[serde(alias = "currentSummary")]
    pub current_summary: String,
    pub instruction: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailsParams {
    pub path: String,
    #[serde(default)]
    pub query: String,
}

/// `get_expanded_details` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Details {
    pub tech_stack: String,
    pub search_context: String,
    pub created: i64,
    pub modified: i64,
    pub kind: crate::registry::EntryKind,
}
