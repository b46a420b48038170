// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use crate::{
    channel::{MockAmqpChannel, MockAmqpConnection},
    client::RabbitMQClient,
};
use lapin::{acker::Acker, message::Delivery, types::ShortString, BasicProperties};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
use std::sync::Arc;

/// Builds a client over mocks, exporting finished spans into memory.
pub(crate) fn client(
    channel: MockAmqpChannel,
    connection: MockAmqpConnection,
) -> (RabbitMQClient, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();

    let client = RabbitMQClient::new(Arc::new(connection), Arc::new(channel), &provider);

    (client, exporter)
}

pub(crate) fn delivery(tag: u64, properties: BasicProperties, data: &[u8]) -> Delivery {
    Delivery {
        delivery_tag: tag,
        exchange: ShortString::from("orders-exchange"),
        routing_key: ShortString::from("orders.created"),
        redelivered: false,
        properties,
        data: data.to_vec(),
        acker: Acker::default(),
    }
}
