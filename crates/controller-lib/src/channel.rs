//! Notification channels
//!
//! Channels are a closed set of variants stored inside notifier specs. Each
//! one names a delivery server whose credentials live in a separate
//! configuration file, so specs never carry secrets.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Subject used for relayed notification emails
const EMAIL_SUBJECT: &str = "Cluster watch notification";

/// A notification destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Email delivered through a named mail relay
    Email {
        destination: String,
        server_name: String,
    },
    /// Text message delivered through a named SMS gateway
    Sms {
        destination: String,
        server_name: String,
    },
}

impl NotificationChannel {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationChannel::Email { .. } => "email",
            NotificationChannel::Sms { .. } => "sms",
        }
    }

    pub fn destination(&self) -> &str {
        match self {
            NotificationChannel::Email { destination, .. }
            | NotificationChannel::Sms { destination, .. } => destination,
        }
    }

    pub fn server_name(&self) -> &str {
        match self {
            NotificationChannel::Email { server_name, .. }
            | NotificationChannel::Sms { server_name, .. } => server_name,
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.destination())
    }
}

/// Delivers a composed message through one channel
#[async_trait]
pub trait ChannelDelivery: Send + Sync {
    async fn notify(&self, channel: &NotificationChannel, message: &str) -> Result<()>;
}

/// Credentials for an HTTP mail relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailServer {
    pub name: String,
    pub relay_url: String,
    pub sender: String,
    pub account: String,
    pub password: String,
}

/// Credentials for an SMS gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsGateway {
    pub name: String,
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    pub sender: String,
}

/// Named delivery servers, stored apart from the watch specs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelServers {
    #[serde(default)]
    pub email_servers: Vec<EmailServer>,
    #[serde(default)]
    pub sms_gateways: Vec<SmsGateway>,
}

impl ChannelServers {
    /// Load server definitions from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read channel servers from {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse channel servers")
    }

    pub fn email_server(&self, name: &str) -> Option<&EmailServer> {
        self.email_servers.iter().find(|s| s.name == name)
    }

    pub fn sms_gateway(&self, name: &str) -> Option<&SmsGateway> {
        self.sms_gateways.iter().find(|s| s.name == name)
    }
}

#[derive(Serialize)]
struct RelayedEmail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Channel delivery over HTTP relays and gateways
pub struct HttpChannelDelivery {
    client: reqwest::Client,
    servers: ChannelServers,
}

impl HttpChannelDelivery {
    pub fn new(servers: ChannelServers, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, servers })
    }

    async fn send_email(&self, destination: &str, server_name: &str, message: &str) -> Result<()> {
        let server = self
            .servers
            .email_server(server_name)
            .ok_or_else(|| anyhow::anyhow!("Unknown email server {}", server_name))?;

        self.client
            .post(&server.relay_url)
            .basic_auth(&server.account, Some(&server.password))
            .json(&RelayedEmail {
                from: &server.sender,
                to: destination,
                subject: EMAIL_SUBJECT,
                body: message,
            })
            .send()
            .await
            .context("Failed to reach mail relay")?
            .error_for_status()
            .context("Mail relay rejected the message")?;

        debug!(server = %server_name, destination = %destination, "Email relayed");
        Ok(())
    }

    async fn send_sms(&self, destination: &str, server_name: &str, message: &str) -> Result<()> {
        let gateway = self
            .servers
            .sms_gateway(server_name)
            .ok_or_else(|| anyhow::anyhow!("Unknown SMS gateway {}", server_name))?;

        self.client
            .post(&gateway.url)
            .form(&[
                ("api_key", gateway.api_key.as_str()),
                ("api_secret", gateway.api_secret.as_str()),
                ("from", gateway.sender.as_str()),
                ("to", destination),
                ("text", message),
            ])
            .send()
            .await
            .context("Failed to reach SMS gateway")?
            .error_for_status()
            .context("SMS gateway rejected the message")?;

        debug!(gateway = %server_name, destination = %destination, "SMS sent");
        Ok(())
    }
}

#[async_trait]
impl ChannelDelivery for HttpChannelDelivery {
    async fn notify(&self, channel: &NotificationChannel, message: &str) -> Result<()> {
        match channel {
            NotificationChannel::Email {
                destination,
                server_name,
            } => self.send_email(destination, server_name, message).await,
            NotificationChannel::Sms {
                destination,
                server_name,
            } => self.send_sms(destination, server_name, message).await,
        }
    }
}
