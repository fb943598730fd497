//! Skill invocation transports. The dispatcher only sees `SkillTransport`; HTTP and
//! in-process adapters sit behind it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::descriptor::PackageDescriptor;
use crate::types::{DispatchOutcome, Message};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("skill transport failed: {0}")]
    Transport(String),
    #[error("skill returned {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("no in-process handler for package {0}")]
    Unknown(String),
}

impl From<reqwest::Error> for InvokeError {
    fn from(e: reqwest::Error) -> Self {
        InvokeError::Transport(e.to_string())
    }
}

/// Reaches a skill package: `invoke(Message) -> DispatchOutcome`.
#[async_trait]
pub trait SkillTransport: Send + Sync {
    async fn invoke(
        &self,
        package: &PackageDescriptor,
        message: &Message,
    ) -> Result<DispatchOutcome, InvokeError>;

    /// Cheap reachability check. Default assumes reachable.
    async fn probe(&self, _package: &PackageDescriptor) -> Result<(), InvokeError> {
        Ok(())
    }
}

/// JSON over HTTP: `POST {endpoint}/invoke` with the Message, `GET {endpoint}/health`.
#[derive(Clone)]
pub struct HttpSkillTransport {
    client: reqwest::Client,
}

impl Default for HttpSkillTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSkillTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn url(package: &PackageDescriptor, path: &str) -> String {
        format!("{}/{}", package.endpoint.trim().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl SkillTransport for HttpSkillTransport {
    async fn invoke(
        &self,
        package: &PackageDescriptor,
        message: &Message,
    ) -> Result<DispatchOutcome, InvokeError> {
        let url = Self::url(package, "invoke");
        let res = self.client.post(&url).json(message).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(InvokeError::Remote { status, body });
        }
        let outcome: DispatchOutcome = res.json().await?;
        Ok(outcome)
    }

    async fn probe(&self, package: &PackageDescriptor) -> Result<(), InvokeError> {
        let url = Self::url(package, "health");
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(InvokeError::Remote { status, body });
        }
        Ok(())
    }
}

/// A skill running inside this process.
#[async_trait]
pub trait LocalSkill: Send + Sync {
    async fn invoke(&self, message: &Message) -> Result<DispatchOutcome, InvokeError>;
}

/// In-process transport: handlers keyed by package name. Endpoints are ignored.
pub struct LocalTransport {
    skills: RwLock<HashMap<String, Arc<dyn LocalSkill>>>,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, package_name: impl Into<String>, skill: Arc<dyn LocalSkill>) {
        self.skills.write().await.insert(package_name.into(), skill);
    }

    async fn handler(&self, name: &str) -> Result<Arc<dyn LocalSkill>, InvokeError> {
        self.skills
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| InvokeError::Unknown(name.to_string()))
    }
}

#[async_trait]
impl SkillTransport for LocalTransport {
    async fn invoke(
        &self,
        package: &PackageDescriptor,
        message: &Message,
    ) -> Result<DispatchOutcome, InvokeError> {
        // The read lock is released before the skill runs.
        let skill = self.handler(&package.name).await?;
        skill.invoke(message).await
    }

    async fn probe(&self, package: &PackageDescriptor) -> Result<(), InvokeError> {
        self.handler(&package.name).await.map(|_| ())
    }
}
