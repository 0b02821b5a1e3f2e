//! The session record and its field-map schema.
//!
//! The engine only stores strings, so optional values collapse to `""` and
//! booleans to `"true"`/`"false"` here, at the boundary. Decoding is strict:
//! a missing field, an unknown field, or a malformed boolean is an error.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Field {field} holds {value:?}, expected \"true\" or \"false\"")]
    InvalidBool { field: &'static str, value: String },
    #[error("Missing field {0}")]
    MissingField(&'static str),
    #[error("Unexpected field {0}")]
    UnexpectedField(String),
}

/// Who a session belongs to, copied from the user directory at login
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionIdentity {
    pub display_name: String,
    pub email: String,
    pub image_url: Option<String>,
    pub phone: Option<String>,
    pub provider: String,
    pub provider_id: String,
    pub role: String,
    pub user_id: String,
    pub verified: bool,
}

/// Where a session was opened from, as reported by the edge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    /// Human label such as "Chrome on Windows 10"
    pub device: String,
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn new(
        device: impl Into<String>,
        user_agent: impl Into<String>,
        ip_address: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Client info with the device label derived from the User-Agent
    pub fn from_user_agent(user_agent: impl Into<String>, ip_address: impl Into<String>) -> Self {
        let user_agent = user_agent.into();
        Self {
            device: crate::device::describe_user_agent(&user_agent),
            ip_address: ip_address.into(),
            user_agent,
        }
    }
}

/// One live login
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub client: ClientInfo,
    pub identity: SessionIdentity,
}

/// Stored field names, in write order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    UserId,
    Name,
    Role,
    ImageUrl,
    Email,
    Provider,
    ProviderId,
    Phone,
    Verified,
    Device,
    UserAgent,
    IpAddress,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::UserId,
        Field::Name,
        Field::Role,
        Field::ImageUrl,
        Field::Email,
        Field::Provider,
        Field::ProviderId,
        Field::Phone,
        Field::Verified,
        Field::Device,
        Field::UserAgent,
        Field::IpAddress,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::UserId => "userID",
            Field::Name => "name",
            Field::Role => "role",
            Field::ImageUrl => "image_url",
            Field::Email => "email",
            Field::Provider => "provider",
            Field::ProviderId => "provider_id",
            Field::Phone => "phone",
            Field::Verified => "verified",
            Field::Device => "device",
            Field::UserAgent => "user_agent",
            Field::IpAddress => "ip_address",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.name() == name)
    }
}

fn flatten_optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn expand_optional(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn flatten_bool(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

fn expand_bool(field: Field, value: String) -> Result<bool, RecordError> {
    match value.as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(RecordError::InvalidBool {
            field: field.name(),
            value,
        }),
    }
}

impl SessionRecord {
    pub fn new(identity: SessionIdentity, client: ClientInfo) -> Self {
        Self { client, identity }
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    fn field_value(&self, field: Field) -> String {
        let identity = &self.identity;
        match field {
            Field::UserId => identity.user_id.clone(),
            Field::Name => identity.display_name.clone(),
            Field::Role => identity.role.clone(),
            Field::ImageUrl => flatten_optional(&identity.image_url),
            Field::Email => identity.email.clone(),
            Field::Provider => identity.provider.clone(),
            Field::ProviderId => identity.provider_id.clone(),
            Field::Phone => flatten_optional(&identity.phone),
            Field::Verified => flatten_bool(identity.verified),
            Field::Device => self.client.device.clone(),
            Field::UserAgent => self.client.user_agent.clone(),
            Field::IpAddress => self.client.ip_address.clone(),
        }
    }

    /// Encode as the stored field map
    pub fn to_fields(&self) -> Vec<(String, String)> {
        Field::ALL
            .into_iter()
            .map(|field| (field.name().to_string(), self.field_value(field)))
            .collect()
    }

    /// Decode a stored field map
    pub fn from_fields(
        fields: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, RecordError> {
        let mut values: HashMap<Field, String> = HashMap::with_capacity(Field::ALL.len());
        for (name, value) in fields {
            let field = Field::from_name(&name).ok_or(RecordError::UnexpectedField(name))?;
            values.insert(field, value);
        }

        let mut take = |field: Field| {
            values
                .remove(&field)
                .ok_or(RecordError::MissingField(field.name()))
        };

        let identity = SessionIdentity {
            user_id: take(Field::UserId)?,
            display_name: take(Field::Name)?,
            role: take(Field::Role)?,
            image_url: expand_optional(take(Field::ImageUrl)?),
            email: take(Field::Email)?,
            provider: take(Field::Provider)?,
            provider_id: take(Field::ProviderId)?,
            phone: expand_optional(take(Field::Phone)?),
            verified: expand_bool(Field::Verified, take(Field::Verified)?)?,
        };
        let client = ClientInfo {
            device: take(Field::Device)?,
            user_agent: take(Field::UserAgent)?,
            ip_address: take(Field::IpAddress)?,
        };

        Ok(Self { client, identity })
    }
}
