// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Round trip against a live broker. Run with:
//! `RABBITMQ_HOST=localhost cargo test -- --ignored`

use rabbitmq_connector::{
    handler_fn, options::DELIVERY_MODE_TRANSIENT, CallContext, ConfigOption, ConnectionConfig,
    Connector, Delivery,
};
use std::{sync::Mutex, time::Duration};
use tokio::sync::oneshot;

#[tokio::test]
#[ignore = "needs a running RabbitMQ"]
async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = ConnectionConfig::load()?;
    let connector = Connector::connect(&cfg).await?;

    let (tx, rx) = oneshot::channel::<Vec<u8>>();
    let tx = Mutex::new(Some(tx));
    let handler = handler_fn(move |delivery: Delivery| {
        let sender = tx.lock().unwrap().take();
        async move {
            if let Some(sender) = sender {
                let _ = sender.send(delivery.data);
            }
        }
    });

    let queue = "rabbitmq-connector.smoke";
    let consumer = connector
        .consume(
            queue,
            handler,
            &[
                ConfigOption::AutoDelete(true),
                ConfigOption::CorrelationFilter("smoke-1".into()),
            ],
        )
        .await?;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    connector
        .publish(
            &ctx,
            queue,
            b"ignored",
            &[
                ConfigOption::AutoDelete(true),
                ConfigOption::CorrelationId("other".into()),
            ],
        )
        .await?;
    connector
        .publish(
            &ctx,
            queue,
            b"ping",
            &[
                ConfigOption::AutoDelete(true),
                ConfigOption::DeliveryMode(DELIVERY_MODE_TRANSIENT),
                ConfigOption::CorrelationId("smoke-1".into()),
            ],
        )
        .await?;

    let body = tokio::time::timeout(Duration::from_secs(5), rx).await??;
    assert_eq!(body, b"ping");

    consumer.stop().await?;
    connector.close_connection().await?;
    Ok(())
}
