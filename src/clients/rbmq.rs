use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, info, warn};

use crate::{
    clients::{health::HealthProbe, publisher::Publisher},
    config::Config,
    error::PublishError,
    models::notification::{NotificationType, QueueMessage},
};

/// One declaration against the broker, in the order it must be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyStep {
    DeclareExchange {
        name: String,
    },
    DeclareQueue {
        name: String,
        dead_letter: Option<DeadLetterTarget>,
    },
    BindQueue {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTarget {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone)]
pub struct BrokerTopology {
    pub exchange: String,
    pub dead_letter_exchange: String,
    pub notification_types: Vec<NotificationType>,
}

impl BrokerTopology {
    pub fn new(
        exchange: impl Into<String>,
        dead_letter_exchange: impl Into<String>,
        notification_types: &[NotificationType],
    ) -> Self {
        Self {
            exchange: exchange.into(),
            dead_letter_exchange: dead_letter_exchange.into(),
            notification_types: notification_types.to_vec(),
        }
    }

    pub fn from_config(config: &Config, notification_types: &[NotificationType]) -> Self {
        Self::new(
            &config.exchange_name,
            &config.dead_letter_exchange_name,
            notification_types,
        )
    }

    /// Ordered declarations. The dead-letter exchange and each DLQ are declared
    /// and bound before the working queue that references them.
    pub fn plan(&self) -> Vec<TopologyStep> {
        let mut steps = vec![
            TopologyStep::DeclareExchange {
                name: self.exchange.clone(),
            },
            TopologyStep::DeclareExchange {
                name: self.dead_letter_exchange.clone(),
            },
        ];

        for notification_type in &self.notification_types {
            let dlq = notification_type.dead_letter_queue_name();
            let queue = notification_type.queue_name();

            steps.push(TopologyStep::DeclareQueue {
                name: dlq.clone(),
                dead_letter: None,
            });
            steps.push(TopologyStep::BindQueue {
                queue: dlq,
                exchange: self.dead_letter_exchange.clone(),
                routing_key: notification_type.dead_letter_routing_key(),
            });
            steps.push(TopologyStep::DeclareQueue {
                name: queue.clone(),
                dead_letter: Some(DeadLetterTarget {
                    exchange: self.dead_letter_exchange.clone(),
                    routing_key: notification_type.dead_letter_routing_key(),
                }),
            });
            steps.push(TopologyStep::BindQueue {
                queue,
                exchange: self.exchange.clone(),
                routing_key: notification_type.routing_key().to_string(),
            });
        }

        steps
    }
}

pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    topology: BrokerTopology,
}

impl RabbitMqClient {
    pub async fn connect(
        config: &Config,
        notification_types: &[NotificationType],
    ) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to enable publisher confirms: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        debug!(prefetch_count = config.prefetch_count, "Prefetch count set");

        let client = Self {
            connection,
            channel,
            topology: BrokerTopology::from_config(config, notification_types),
        };
        client.declare_topology().await?;

        info!("RabbitMQ connection established");

        Ok(client)
    }

    async fn declare_topology(&self) -> Result<(), Error> {
        for step in self.topology.plan() {
            match &step {
                TopologyStep::DeclareExchange { name } => {
                    self.channel
                        .exchange_declare(
                            name,
                            ExchangeKind::Direct,
                            ExchangeDeclareOptions {
                                durable: true,
                                ..Default::default()
                            },
                            FieldTable::default(),
                        )
                        .await
                        .map_err(|e| anyhow!("Failed to declare exchange {}: {}", name, e))?;
                }
                TopologyStep::DeclareQueue { name, dead_letter } => {
                    let mut arguments = FieldTable::default();
                    if let Some(target) = dead_letter {
                        arguments.insert(
                            "x-dead-letter-exchange".into(),
                            AMQPValue::LongString(target.exchange.clone().into()),
                        );
                        arguments.insert(
                            "x-dead-letter-routing-key".into(),
                            AMQPValue::LongString(target.routing_key.clone().into()),
                        );
                    }

                    self.channel
                        .queue_declare(
                            name,
                            QueueDeclareOptions {
                                durable: true,
                                ..Default::default()
                            },
                            arguments,
                        )
                        .await
                        .map_err(|e| anyhow!("Failed to declare queue {}: {}", name, e))?;
                }
                TopologyStep::BindQueue {
                    queue,
                    exchange,
                    routing_key,
                } => {
                    self.channel
                        .queue_bind(
                            queue,
                            exchange,
                            routing_key,
                            QueueBindOptions::default(),
                            FieldTable::default(),
                        )
                        .await
                        .map_err(|e| anyhow!("Failed to bind queue {}: {}", queue, e))?;
                }
            }

            debug!(?step, "Topology step applied");
        }

        Ok(())
    }

    pub async fn create_consumer(
        &self,
        notification_type: NotificationType,
        consumer_tag: &str,
    ) -> Result<Consumer, Error> {
        self.create_consumer_on(&notification_type.queue_name(), consumer_tag)
            .await
    }

    /// Consumes any declared queue by name, e.g. a dead-letter queue.
    pub async fn create_consumer_on(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue, consumer_tag, "Consumer created for queue");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    /// Negative acknowledgement. Without requeue the broker dead-letters the message.
    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))?;

        Ok(())
    }

    pub async fn close(&self) -> Result<(), Error> {
        if let Err(e) = self.channel.close(200, "shutdown".into()).await {
            warn!(error = %e, "Failed to close RabbitMQ channel cleanly");
        }

        self.connection
            .close(200, "shutdown".into())
            .await
            .map_err(|e| anyhow!("Failed to close RabbitMQ connection: {}", e))?;

        info!("RabbitMQ connection closed");

        Ok(())
    }
}

#[async_trait]
impl Publisher for RabbitMqClient {
    async fn publish(
        &self,
        notification_type: NotificationType,
        message: &QueueMessage,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(message)?;
        let routing_key = notification_type.routing_key();

        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".to_string().into())
            .with_message_id(message.request_id.clone().into())
            .with_priority(message.priority.clamp(0, 9) as u8);

        let confirmation = self
            .channel
            .basic_publish(
                &self.topology.exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &payload,
                properties,
            )
            .await?
            .await?;

        match confirmation {
            Confirmation::Nack(_) | Confirmation::Ack(Some(_)) => {
                warn!(
                    request_id = %message.request_id,
                    routing_key,
                    "Broker did not accept notification message"
                );
                Err(PublishError::Rejected {
                    routing_key: routing_key.to_string(),
                })
            }
            _ => {
                debug!(request_id = %message.request_id, routing_key, "Notification message published");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl HealthProbe for RabbitMqClient {
    fn name(&self) -> &str {
        "message_broker"
    }

    async fn check(&self) -> Result<(), Error> {
        if !self.connection.status().connected() {
            return Err(anyhow!("Connection is not open"));
        }

        if !self.channel.status().connected() {
            return Err(anyhow!("Channel is not open"));
        }

        Ok(())
    }
}
