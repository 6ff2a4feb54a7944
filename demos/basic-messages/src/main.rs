use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use vmp::prelude::*;
use vmp::vmp_protocol::to_base64;

// ---------------------------------------------------------------------------
// Application type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

const POINT_TAG: &str = "demo.Point";

fn register_point(registry: &TypeRegistry) {
    registry.register_type::<Point, _, _>(
        POINT_TAG,
        |point| {
            Ok(ZData::new(POINT_TAG)
                .with_field("x", point.x)
                .with_field("y", point.y))
        },
        |zdata| {
            let coord = |name: &str| {
                zdata
                    .field(name)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| ProtocolError::malformed(POINT_TAG, format!("missing {name}")))
            };
            Ok(Point {
                x: coord("x")?,
                y: coord("y")?,
            })
        },
    );
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Answers `midpoint` calls until the connection closes.
async fn serve(
    server: Endpoint,
    mut inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
) -> Result<(), VmpError> {
    while let Some(bytes) = inbox.recv().await {
        let Inbound::Message(message) = server.handle_inbound(&bytes)? else {
            continue;
        };
        if message.rtype.is_none() {
            tracing::info!(etype = %message.etype, "server got event");
            continue;
        }

        let request = RpcRequest::try_from(message)?;
        tracing::info!(method = %request.etype, id = %request.rtype, "server got call");
        let result = match request.etype.as_str() {
            "midpoint" => midpoint(request.kwargs.as_ref()),
            other => Err(format!("no method named {other}")),
        };
        if outbox.send(server.respond(&request, result)?).is_err() {
            break;
        }
    }
    Ok(())
}

fn midpoint(kwargs: Option<&Map>) -> Result<Value, String> {
    let point = |name: &str| {
        kwargs
            .and_then(|kwargs| kwargs.get(name))
            .and_then(Value::as_native::<Point>)
            .copied()
            .ok_or_else(|| format!("{name} must be a Point"))
    };
    let (a, b) = (point("a")?, point("b")?);
    Ok(Value::native(Point {
        x: (a.x + b.x) / 2.0,
        y: (a.y + b.y) / 2.0,
    }))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), VmpError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    register_point(TypeRegistry::global());

    let client = Endpoint::default();
    let server = Endpoint::default();

    let (to_server, server_inbox) = mpsc::unbounded_channel();
    let (to_client, mut client_inbox) = mpsc::unbounded_channel();
    let server_task = tokio::spawn(serve(server, server_inbox, to_client));

    // Events are fire-and-forget.
    let event = ClientEvent::new("CAMERA_MOVE", Value::native(Point { x: 1.0, y: 2.0 }))
        .with_key("main");
    let bytes = client.encode(&event)?;
    tracing::info!(base64 = %to_base64(&bytes), "client sent event");
    if to_server.send(bytes).is_err() {
        tracing::warn!("server is gone, event not delivered");
    }

    // Calls are answered on the same connection.
    let reader = client.clone();
    tokio::spawn(async move {
        while let Some(bytes) = client_inbox.recv().await {
            match reader.handle_inbound(&bytes) {
                Ok(Inbound::Completed(id)) => tracing::debug!(%id, "call answered"),
                Ok(Inbound::Message(message)) => {
                    tracing::info!(etype = %message.etype, "client got event");
                }
                Err(err) => tracing::warn!(%err, "dropping inbound frame"),
            }
        }
    });

    let mut kwargs = Map::new();
    kwargs.insert("a".into(), Value::native(Point { x: 0.0, y: 0.0 }));
    kwargs.insert("b".into(), Value::native(Point { x: 4.0, y: 2.0 }));
    let sender = to_server.clone();
    let response = client
        .call("midpoint", None, Some(kwargs), Some(Duration::from_secs(1)), move |bytes| {
            sender.send(bytes)
        })
        .await?;
    let mid = response.data.as_ref().and_then(Value::as_native::<Point>);
    tracing::info!(?mid, "midpoint");

    let sender = to_server.clone();
    match client
        .call("rotate", None, None, None, move |bytes| sender.send(bytes))
        .await
    {
        Err(err) => tracing::info!(%err, "rotate failed as expected"),
        Ok(response) => tracing::warn!(?response, "rotate unexpectedly succeeded"),
    }

    client.shutdown();
    drop(to_server);
    if let Err(err) = server_task.await {
        tracing::warn!(%err, "server task ended abnormally");
    }
    Ok(())
}
