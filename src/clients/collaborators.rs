use async_trait::async_trait;

use crate::{
    error::DeliveryError,
    models::{
        collaborator::UserProfile,
        notification::QueueMessage,
        template::{RenderedMessage, Template},
    },
};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn fetch_user(&self, user_id: &str) -> Result<UserProfile, DeliveryError>;
}

#[async_trait]
pub trait TemplateDirectory: Send + Sync {
    async fn fetch_template(
        &self,
        template_code: &str,
        language: &str,
    ) -> Result<Template, DeliveryError>;
}

/// External channel that hands a rendered notification to the end user.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(
        &self,
        recipient: &str,
        rendered: &RenderedMessage,
        message: &QueueMessage,
    ) -> Result<(), DeliveryError>;
}
