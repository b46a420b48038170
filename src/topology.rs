// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares exchanges, queues and bindings, and manages the Dead
//! Letter Exchange (DLX) / Dead Letter Queue (DLQ) pair attached to a source
//! queue. Every declaration is idempotent on the broker.
//!
//! The main components are:
//! - Topology operations on `RabbitMQClient`
//! - `AmqpTopology`: batch builder installing a whole topology in order
//!
//! `setup_dlx_for_queue` is destructive: an existing source queue is deleted
//! and recreated, and any message still on it is lost.

use crate::{
    channel::AMQP_REPLY_SUCCESS,
    client::RabbitMQClient,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    otel,
    queue::{self, DLQOptions, DLXOptions, QueueBinding, QueueDefinition, QueueOptions},
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions},
    types::FieldTable,
};
use opentelemetry::{
    trace::{SpanKind, TraceContextExt},
    Context, KeyValue,
};
use tracing::{debug, error, warn};

impl RabbitMQClient {
    /// Declares an exchange.
    ///
    /// # Parameters
    /// * `ctx` - Caller context, parent of the operation span
    /// * `def` - The exchange definition
    ///
    /// # Returns
    /// Ok(()) on success or `DeclareExchangeError` on failure
    pub async fn declare_exchange(
        &self,
        ctx: &Context,
        def: &ExchangeDefinition,
    ) -> Result<(), AmqpError> {
        let cx = otel::start_span(
            &self.tracer,
            ctx,
            "declare_exchange",
            SpanKind::Client,
            vec![
                KeyValue::new("rabbitmq.exchange", def.name.clone()),
                KeyValue::new("rabbitmq.kind", def.kind.as_str()),
                KeyValue::new("rabbitmq.durable", def.durable),
                KeyValue::new("rabbitmq.auto_delete", def.auto_delete),
                KeyValue::new("rabbitmq.internal", def.internal),
                KeyValue::new("rabbitmq.operation", "declare_exchange"),
            ],
        );

        let result = self.exchange_declare(def).await;
        otel::finish(&cx, &result);
        result
    }

    /// Declares a queue.
    ///
    /// # Parameters
    /// * `ctx` - Caller context, parent of the operation span
    /// * `def` - The queue definition
    ///
    /// # Returns
    /// Ok(()) on success or `DeclareQueueError` on failure
    pub async fn declare_queue(
        &self,
        ctx: &Context,
        def: &QueueDefinition,
    ) -> Result<(), AmqpError> {
        let cx = otel::start_span(
            &self.tracer,
            ctx,
            "declare_queue",
            SpanKind::Client,
            vec![
                KeyValue::new("rabbitmq.queue", def.name.clone()),
                KeyValue::new("rabbitmq.durable", def.durable),
                KeyValue::new("rabbitmq.auto_delete", def.auto_delete),
                KeyValue::new("rabbitmq.exclusive", def.exclusive),
                KeyValue::new("rabbitmq.operation", "declare_queue"),
            ],
        );

        let result = self.queue_declare(def).await;
        otel::finish(&cx, &result);
        result
    }

    /// Declares a queue whose argument table wires in dead-lettering, TTL,
    /// length and priority limits and the retry marker from `options`.
    pub async fn declare_queue_with_dlx(
        &self,
        ctx: &Context,
        name: &str,
        options: &QueueOptions,
    ) -> Result<(), AmqpError> {
        let mut attributes = vec![
            KeyValue::new("rabbitmq.queue", name.to_owned()),
            KeyValue::new("rabbitmq.durable", options.durable),
            KeyValue::new("rabbitmq.auto_delete", options.auto_delete),
            KeyValue::new("rabbitmq.operation", "declare_queue_with_dlx"),
        ];
        if let Some(dlx) = &options.dlx_name {
            attributes.push(KeyValue::new("rabbitmq.dlx", dlx.clone()));
        }
        if let Some(retries) = options.max_retries {
            attributes.push(KeyValue::new("rabbitmq.max_retries", i64::from(retries)));
        }

        let cx = otel::start_span(
            &self.tracer,
            ctx,
            "declare_queue_with_dlx",
            SpanKind::Client,
            attributes,
        );

        let def = QueueDefinition {
            name: name.to_owned(),
            durable: options.durable,
            auto_delete: options.auto_delete,
            exclusive: options.exclusive,
            no_wait: options.no_wait,
            args: options.arguments(name),
        };

        let result = self.queue_declare(&def).await;
        if result.is_ok() {
            debug!(
                queue = name,
                dlx = options.dlx_name.as_deref().unwrap_or_default(),
                "queue with dlx declared"
            );
        }

        otel::finish(&cx, &result);
        result
    }

    /// Declares an exchange meant to receive dead-lettered messages.
    ///
    /// The exchange kind defaults to Direct.
    pub async fn declare_dlx(
        &self,
        ctx: &Context,
        name: &str,
        options: &DLXOptions,
    ) -> Result<(), AmqpError> {
        let kind = options.kind.unwrap_or(ExchangeKind::Direct);

        let cx = otel::start_span(
            &self.tracer,
            ctx,
            "declare_dlx",
            SpanKind::Client,
            vec![
                KeyValue::new("rabbitmq.dlx", name.to_owned()),
                KeyValue::new("rabbitmq.kind", kind.as_str()),
                KeyValue::new("rabbitmq.durable", options.durable),
                KeyValue::new("rabbitmq.operation", "declare_dlx"),
            ],
        );

        let def = ExchangeDefinition {
            name: name.to_owned(),
            kind,
            durable: options.durable,
            auto_delete: options.auto_delete,
            internal: options.internal,
            no_wait: options.no_wait,
            params: options.args.clone(),
        };

        let result = self.exchange_declare(&def).await;
        otel::finish(&cx, &result);
        result
    }

    /// Declares a Dead Letter Queue and binds it to `dlx_name`.
    ///
    /// The binding uses the queue's own name as routing key; source queues
    /// must dead-letter with that same key to reach it.
    pub async fn declare_dlq(
        &self,
        ctx: &Context,
        name: &str,
        dlx_name: &str,
        options: &DLQOptions,
    ) -> Result<(), AmqpError> {
        let cx = otel::start_span(
            &self.tracer,
            ctx,
            "declare_dlq",
            SpanKind::Client,
            vec![
                KeyValue::new("rabbitmq.dlq", name.to_owned()),
                KeyValue::new("rabbitmq.dlx", dlx_name.to_owned()),
                KeyValue::new("rabbitmq.durable", options.durable),
                KeyValue::new("rabbitmq.operation", "declare_dlq"),
            ],
        );

        let def = QueueDefinition {
            name: name.to_owned(),
            durable: options.durable,
            auto_delete: options.auto_delete,
            exclusive: options.exclusive,
            no_wait: options.no_wait,
            args: options.args.clone(),
        };
        let binding = QueueBinding {
            queue_name: name.to_owned(),
            exchange_name: dlx_name.to_owned(),
            routing_key: name.to_owned(),
            no_wait: options.no_wait,
            args: FieldTable::default(),
        };

        let result = match self.queue_declare(&def).await {
            Ok(()) => self.queue_bind(&binding).await,
            Err(err) => Err(err),
        };

        otel::finish(&cx, &result);
        result
    }

    /// Binds a queue to an exchange.
    pub async fn bind_queue(&self, ctx: &Context, binding: &QueueBinding) -> Result<(), AmqpError> {
        let cx = otel::start_span(
            &self.tracer,
            ctx,
            "bind_queue",
            SpanKind::Client,
            vec![
                KeyValue::new("rabbitmq.queue", binding.queue_name.clone()),
                KeyValue::new("rabbitmq.exchange", binding.exchange_name.clone()),
                KeyValue::new("rabbitmq.routing_key", binding.routing_key.clone()),
                KeyValue::new("rabbitmq.operation", "bind_queue"),
            ],
        );

        let result = self.queue_bind(binding).await;
        otel::finish(&cx, &result);
        result
    }

    /// Sets up a DLX/DLQ pair for `queue_name`, which may already exist.
    ///
    /// This method performs the following operations in order:
    /// 1. Declares the DLX
    /// 2. Declares the DLQ, never auto-deleted, and binds it to the DLX
    /// 3. Declares `queue_name` with dead-letter arguments pointing at the DLX
    ///    with the DLQ name as routing key
    ///
    /// Queue arguments cannot change in place, so an existing queue is
    /// **deleted and recreated**: messages still on it are lost. A failed
    /// delete is logged and the declare is attempted anyway. Steps 1 and 2 are
    /// not rolled back when step 3 fails.
    pub async fn setup_dlx_for_queue(
        &self,
        ctx: &Context,
        queue_name: &str,
        dlx_name: &str,
        dlq_name: &str,
        options: &DLXOptions,
    ) -> Result<(), AmqpError> {
        let cx = otel::start_span(
            &self.tracer,
            ctx,
            "setup_dlx_for_queue",
            SpanKind::Internal,
            vec![
                KeyValue::new("rabbitmq.queue", queue_name.to_owned()),
                KeyValue::new("rabbitmq.dlx", dlx_name.to_owned()),
                KeyValue::new("rabbitmq.dlq", dlq_name.to_owned()),
                KeyValue::new("rabbitmq.operation", "setup_dlx_for_queue"),
            ],
        );

        let result = self
            .retrofit_dlx(&cx, queue_name, dlx_name, dlq_name, options)
            .await;

        if result.is_ok() {
            debug!(
                queue = queue_name,
                dlx = dlx_name,
                dlq = dlq_name,
                "dlx/dlq setup for queue completed"
            );
        }

        otel::finish(&cx, &result);
        result
    }

    async fn retrofit_dlx(
        &self,
        cx: &Context,
        queue_name: &str,
        dlx_name: &str,
        dlq_name: &str,
        options: &DLXOptions,
    ) -> Result<(), AmqpError> {
        self.declare_dlx(cx, dlx_name, options).await?;

        let dlq_options = DLQOptions {
            durable: options.durable,
            auto_delete: false,
            exclusive: false,
            no_wait: options.no_wait,
            args: FieldTable::default(),
        };
        self.declare_dlq(cx, dlq_name, dlx_name, &dlq_options).await?;

        let def = QueueDefinition {
            name: queue_name.to_owned(),
            durable: options.durable,
            auto_delete: false,
            exclusive: false,
            no_wait: false,
            args: queue::dead_letter_arguments(dlx_name, dlq_name),
        };

        if self.queue_exists(queue_name).await? {
            warn!(
                queue = queue_name,
                "queue exists, recreating it with dlx arguments, pending messages will be lost"
            );

            if let Err(err) = self
                .channel
                .queue_delete(queue_name, QueueDeleteOptions::default())
                .await
            {
                let err = AmqpError::DeleteQueueError(queue_name.to_owned(), err.to_string());
                warn!(
                    error = err.to_string(),
                    "failure to delete queue, declaring with dlx arguments anyway"
                );
                cx.span().record_error(&err);
            }
        } else {
            debug!(queue = queue_name, "queue does not exist, creating it with dlx arguments");
        }

        self.queue_declare(&def).await
    }

    /// Checks for a queue with a passive declare.
    ///
    /// A failed passive declare makes the broker close the channel it ran on,
    /// so the probe runs on its own short-lived channel.
    async fn queue_exists(&self, name: &str) -> Result<bool, AmqpError> {
        let probe = self.connection.create_channel().await.map_err(|err| {
            error!(error = err.to_string(), "failure to open probe channel");
            AmqpError::ChannelError(err.to_string())
        })?;

        let exists = probe
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .is_ok();

        if let Err(err) = probe.close(AMQP_REPLY_SUCCESS, "probe").await {
            debug!(error = err.to_string(), "probe channel already closed");
        }

        Ok(exists)
    }

    pub(crate) async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        match self
            .channel
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: def.auto_delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                def.params.clone(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(
                    def.name.clone(),
                    err.to_string(),
                ))
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    pub(crate) async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.auto_delete,
                    nowait: def.no_wait,
                },
                def.args.clone(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(def.name.clone(), err.to_string()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    pub(crate) async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions {
                    nowait: binding.no_wait,
                },
                binding.args.clone(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                    err.to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Batch description of a topology, installed in one call.
///
/// Install order: exchanges, plain queues, dead-letter enabled queues, then
/// bindings, so every binding finds both of its ends.
#[derive(Debug, Clone, Default)]
pub struct AmqpTopology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) dlx_queues: Vec<(String, QueueOptions)>,
    pub(crate) bindings: Vec<QueueBinding>,
}

impl AmqpTopology {
    pub fn new() -> AmqpTopology {
        AmqpTopology::default()
    }

    /// Adds an exchange definition to the topology.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue declared with dead-letter arguments.
    pub fn queue_with_dlx(mut self, name: &str, options: QueueOptions) -> Self {
        self.dlx_queues.push((name.to_owned(), options));
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Installs the topology, stopping at the first failure.
    pub async fn install(&self, ctx: &Context, client: &RabbitMQClient) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            client.declare_exchange(ctx, exch).await?;
        }

        for queue in &self.queues {
            client.declare_queue(ctx, queue).await?;
        }

        for (name, options) in &self.dlx_queues {
            client.declare_queue_with_dlx(ctx, name, options).await?;
        }

        for binding in &self.bindings {
            client.bind_queue(ctx, binding).await?;
        }

        debug!("topology installed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{AmqpChannel, MockAmqpChannel, MockAmqpConnection},
        headers::{header, HeaderValue},
        mocks,
        queue::{AMQP_HEADERS_DEAD_LETTER_EXCHANGE, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY},
    };
    use mockall::Sequence;
    use std::sync::Arc;

    fn dead_letter(args: &FieldTable) -> (Option<HeaderValue>, Option<HeaderValue>) {
        let args = Some(args.clone());
        (
            header(&args, AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            header(&args, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
        )
    }

    fn probe_channel(exists: bool) -> Arc<dyn AmqpChannel> {
        let mut probe = MockAmqpChannel::new();
        probe
            .expect_queue_declare()
            .withf(|name, options, _| name == "orders" && options.passive)
            .times(1)
            .returning(move |_, _, _| {
                if exists {
                    Ok(())
                } else {
                    Err(lapin::Error::ChannelsLimitReached)
                }
            });
        probe.expect_close().times(1).returning(|_, _| Ok(()));
        Arc::new(probe)
    }

    #[tokio::test]
    async fn redeclares_every_exchange_kind() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_exchange_declare()
            .times(8)
            .returning(|_, _, _, _| Ok(()));

        let (client, _) = mocks::client(channel, MockAmqpConnection::new());

        for kind in ExchangeKind::ALL {
            let def = ExchangeDefinition::new("events").kind(kind).durable();
            assert!(client.declare_exchange(&Context::new(), &def).await.is_ok());
            assert!(client.declare_exchange(&Context::new(), &def).await.is_ok());
        }
    }

    #[tokio::test]
    async fn reports_exchange_conflicts() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_exchange_declare()
            .times(1)
            .returning(|_, _, _, _| Err(lapin::Error::ChannelsLimitReached));

        let (client, exporter) = mocks::client(channel, MockAmqpConnection::new());

        let res = client
            .declare_exchange(&Context::new(), &ExchangeDefinition::new("events"))
            .await;

        assert!(matches!(res, Err(AmqpError::DeclareExchangeError(name, _)) if name == "events"));
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "rabbitmq.declare_exchange");
    }

    #[tokio::test]
    async fn declares_queue_with_dead_letter_arguments() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_queue_declare()
            .withf(|name, options, args| {
                name == "orders"
                    && options.durable
                    && dead_letter(args)
                        == (
                            Some(HeaderValue::from("orders-dlx")),
                            Some(HeaderValue::from("orders")),
                        )
                    && header(&Some(args.clone()), "x-message-ttl") == Some(HeaderValue::Int(60000))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (client, _) = mocks::client(channel, MockAmqpConnection::new());

        let options = QueueOptions {
            durable: true,
            dlx_name: Some("orders-dlx".to_owned()),
            max_retries: Some(3),
            message_ttl: Some(60000),
            ..QueueOptions::default()
        };

        assert!(client
            .declare_queue_with_dlx(&Context::new(), "orders", &options)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn dlx_defaults_to_direct() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_exchange_declare()
            .withf(|name, kind, _, _| {
                name == "orders-dlx" && matches!(kind, lapin::ExchangeKind::Direct)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let (client, _) = mocks::client(channel, MockAmqpConnection::new());

        assert!(client
            .declare_dlx(&Context::new(), "orders-dlx", &DLXOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn dlq_is_bound_with_its_own_name() {
        let mut seq = Sequence::new();
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_queue_declare()
            .withf(|name, _, _| name == "orders-dlq")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .withf(|queue, exchange, key, options, args| {
                queue == "orders-dlq"
                    && exchange == "orders-dlx"
                    && key == "orders-dlq"
                    && !options.nowait
                    && args.inner().is_empty()
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _| Ok(()));

        let (client, _) = mocks::client(channel, MockAmqpConnection::new());

        assert!(client
            .declare_dlq(&Context::new(), "orders-dlq", "orders-dlx", &DLQOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn dlq_is_not_bound_when_declare_fails() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_queue_declare()
            .times(1)
            .returning(|_, _, _| Err(lapin::Error::ChannelsLimitReached));
        channel.expect_queue_bind().never();

        let (client, _) = mocks::client(channel, MockAmqpConnection::new());

        let res = client
            .declare_dlq(&Context::new(), "orders-dlq", "orders-dlx", &DLQOptions::default())
            .await;

        assert!(matches!(res, Err(AmqpError::DeclareQueueError(name, _)) if name == "orders-dlq"));
    }

    #[tokio::test]
    async fn setup_recreates_existing_queue_with_dlx() {
        let mut seq = Sequence::new();
        let mut channel = MockAmqpChannel::new();
        let mut connection = MockAmqpConnection::new();

        channel
            .expect_exchange_declare()
            .withf(|name, _, _, _| name == "orders-dlx")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .withf(|name, options, _| name == "orders-dlq" && !options.auto_delete)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .withf(|queue, exchange, key, _, _| {
                queue == "orders-dlq" && exchange == "orders-dlx" && key == "orders-dlq"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _| Ok(()));
        connection
            .expect_create_channel()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Ok(probe_channel(true)));
        channel
            .expect_queue_delete()
            .withf(|name, _| name == "orders")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(12));
        channel
            .expect_queue_declare()
            .withf(|name, options, args| {
                name == "orders"
                    && !options.passive
                    && !options.auto_delete
                    && dead_letter(args)
                        == (
                            Some(HeaderValue::from("orders-dlx")),
                            Some(HeaderValue::from("orders-dlq")),
                        )
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let (client, exporter) = mocks::client(channel, connection);

        let res = client
            .setup_dlx_for_queue(
                &Context::new(),
                "orders",
                "orders-dlx",
                "orders-dlq",
                &DLXOptions::default(),
            )
            .await;

        assert!(res.is_ok());

        let spans = exporter.get_finished_spans().unwrap();
        let setup = spans
            .iter()
            .find(|span| span.name == "rabbitmq.setup_dlx_for_queue")
            .unwrap();
        let dlx = spans
            .iter()
            .find(|span| span.name == "rabbitmq.declare_dlx")
            .unwrap();
        assert_eq!(dlx.parent_span_id, setup.span_context.span_id());
    }

    #[tokio::test]
    async fn setup_creates_missing_queue_without_delete() {
        let mut channel = MockAmqpChannel::new();
        let mut connection = MockAmqpConnection::new();

        channel
            .expect_exchange_declare()
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .times(2)
            .returning(|_, _, _| Ok(()));
        channel.expect_queue_delete().never();
        connection
            .expect_create_channel()
            .times(1)
            .return_once(|| Ok(probe_channel(false)));

        let (client, _) = mocks::client(channel, connection);

        let res = client
            .setup_dlx_for_queue(
                &Context::new(),
                "orders",
                "orders-dlx",
                "orders-dlq",
                &DLXOptions::default(),
            )
            .await;

        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn setup_declares_even_when_delete_fails() {
        let mut channel = MockAmqpChannel::new();
        let mut connection = MockAmqpConnection::new();

        channel
            .expect_exchange_declare()
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        channel
            .expect_queue_delete()
            .times(1)
            .returning(|_, _| Err(lapin::Error::ChannelsLimitReached));
        channel
            .expect_queue_declare()
            .withf(|name, _, _| name == "orders-dlq")
            .times(1)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .withf(|name, _, _| name == "orders")
            .times(1)
            .returning(|_, _, _| Ok(()));
        connection
            .expect_create_channel()
            .times(1)
            .return_once(|| Ok(probe_channel(true)));

        let (client, _) = mocks::client(channel, connection);

        let res = client
            .setup_dlx_for_queue(
                &Context::new(),
                "orders",
                "orders-dlx",
                "orders-dlq",
                &DLXOptions::default(),
            )
            .await;

        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn setup_fails_when_final_declare_fails() {
        let mut channel = MockAmqpChannel::new();
        let mut connection = MockAmqpConnection::new();

        channel
            .expect_exchange_declare()
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        channel
            .expect_queue_delete()
            .times(1)
            .returning(|_, _| Ok(0));
        channel
            .expect_queue_declare()
            .withf(|name, _, _| name == "orders-dlq")
            .times(1)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .withf(|name, _, _| name == "orders")
            .times(1)
            .returning(|_, _, _| Err(lapin::Error::ChannelsLimitReached));
        connection
            .expect_create_channel()
            .times(1)
            .return_once(|| Ok(probe_channel(true)));

        let (client, _) = mocks::client(channel, connection);

        let res = client
            .setup_dlx_for_queue(
                &Context::new(),
                "orders",
                "orders-dlx",
                "orders-dlq",
                &DLXOptions::default(),
            )
            .await;

        assert!(matches!(res, Err(AmqpError::DeclareQueueError(name, _)) if name == "orders"));
    }

    #[tokio::test]
    async fn setup_stops_when_dlx_fails() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_exchange_declare()
            .times(1)
            .returning(|_, _, _, _| Err(lapin::Error::ChannelsLimitReached));
        channel.expect_queue_declare().never();

        let (client, _) = mocks::client(channel, MockAmqpConnection::new());

        let res = client
            .setup_dlx_for_queue(
                &Context::new(),
                "orders",
                "orders-dlx",
                "orders-dlq",
                &DLXOptions::default(),
            )
            .await;

        assert!(matches!(
            res,
            Err(AmqpError::DeclareExchangeError(name, _)) if name == "orders-dlx"
        ));
    }

    #[tokio::test]
    async fn installs_topology_in_order() {
        let mut seq = Sequence::new();
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_exchange_declare()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .withf(|name, _, _| name == "audit")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .withf(|name, _, args| name == "orders" && !args.inner().is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _| Ok(()));

        let (client, _) = mocks::client(channel, MockAmqpConnection::new());

        let topology = AmqpTopology::new()
            .exchange(ExchangeDefinition::new("events").topic().durable())
            .queue(QueueDefinition::new("audit").durable())
            .queue_with_dlx(
                "orders",
                QueueOptions {
                    dlx_name: Some("orders-dlx".to_owned()),
                    ..QueueOptions::default()
                },
            )
            .queue_binding(QueueBinding::new("audit").exchange("events").routing_key("#"))
            .queue_binding(
                QueueBinding::new("orders")
                    .exchange("events")
                    .routing_key("orders.*"),
            );

        assert!(topology.install(&Context::new(), &client).await.is_ok());
    }
}
