use anyhow::{anyhow, Result};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use crate::config::AppConfig;
use crate::domain::notification::Notification;
use crate::domain::rule::Channel;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound delivery endpoints for the external channels. A channel with no
/// configured provider fails delivery for that channel only; the in-app
/// record is written by the dispatcher before any of these run.
#[derive(Clone)]
pub struct ChannelTransports {
    email: Option<EmailTransport>,
    sms: Option<WebhookTransport>,
    push: Option<WebhookTransport>,
}

impl ChannelTransports {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let email = match &config.smtp_host {
            Some(host) => Some(EmailTransport::new(
                host,
                config.smtp_port,
                config.smtp_from.clone(),
                config.smtp_user.clone(),
                config.smtp_password.clone(),
            )?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| anyhow!("failed to build http client: {}", err))?;

        let sms = config
            .sms_webhook_url
            .clone()
            .map(|url| WebhookTransport::new(client.clone(), url));
        let push = config
            .push_webhook_url
            .clone()
            .map(|url| WebhookTransport::new(client, url));

        Ok(Self { email, sms, push })
    }

    pub async fn send(
        &self,
        channel: Channel,
        recipient_email: &str,
        notification: &Notification,
    ) -> Result<()> {
        match channel {
            Channel::Email => match &self.email {
                Some(email) => email.send(recipient_email, notification).await,
                None => Err(anyhow!("email transport not configured")),
            },
            Channel::Sms => match &self.sms {
                Some(sms) => sms.send(notification).await,
                None => Err(anyhow!("sms transport not configured")),
            },
            Channel::Push => match &self.push {
                Some(push) => push.send(notification).await,
                None => Err(anyhow!("push transport not configured")),
            },
            Channel::InApp => Err(anyhow!("in_app is delivered by the inbox write")),
        }
    }
}

#[derive(Clone)]
pub struct EmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl EmailTransport {
    pub fn new(
        host: &str,
        port: u16,
        from_address: String,
        user: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|err| anyhow!("invalid SMTP relay {}: {}", host, err))?
            .port(port);

        if let (Some(user), Some(password)) = (user, password) {
            builder = builder.credentials(Credentials::new(user, password));
        }

        Ok(Self {
            mailer: builder.build(),
            from_address,
        })
    }

    pub async fn send(&self, to_email: &str, notification: &Notification) -> Result<()> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|err| anyhow!("invalid from address: {}", err))?,
            )
            .to(to_email
                .parse()
                .map_err(|err| anyhow!("invalid recipient address: {}", err))?)
            .subject(notification.title.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.message.clone())
            .map_err(|err| anyhow!("failed to build email: {}", err))?;

        self.mailer
            .send(email)
            .await
            .map_err(|err| anyhow!("smtp send failed: {}", err))?;

        tracing::debug!(to = to_email, notification_id = %notification.id, "email sent");
        Ok(())
    }
}

#[derive(Clone)]
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    pub async fn send(&self, notification: &Notification) -> Result<()> {
        let payload = serde_json::json!({
            "user_id": notification.user_id,
            "kind": notification.kind.as_db(),
            "title": notification.title,
            "message": notification.message,
            "priority": notification.priority.as_db(),
            "data": notification.data,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| anyhow!("webhook request failed: {}", err))?;

        if !response.status().is_success() {
            return Err(anyhow!("webhook returned HTTP {}", response.status().as_u16()));
        }

        tracing::debug!(notification_id = %notification.id, url = %self.url, "webhook delivered");
        Ok(())
    }
}
