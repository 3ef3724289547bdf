//! Example: a greeter handler wrapped by the logging interceptor
//!
//! Runs a few calls in-process and prints the completion records through the
//! configured tracing subscriber.
//!
//! Run with:
//! cargo run --example server
//!
//! Switch to JSON output with:
//! CTXLOG__TELEMETRY__JSON_LOGGING=true cargo run --example server

use anyhow::Context;
use futures::StreamExt;
use grpc_ctxlog::{ctxlog, Field, InterceptorOptions, LoggingInterceptor, ServerStream, TracingSink};
use grpc_ctxlog::{request_context, CallLogger, FieldFormat};
use grpc_ctxlog_common::{init_from_config, AppConfig};
use std::sync::Arc;
use tonic::{GrpcMethod, Request, Response, Status};

async fn say_hello(request: Request<String>) -> Result<Response<String>, Status> {
    let name = request.get_ref().trim().to_string();
    if name.is_empty() {
        return Err(Status::invalid_argument("name must not be empty"));
    }

    let logger = ctxlog::from_request(&request);
    logger.debug("building greeting");
    ctxlog::add_fields(&request_context(&request), [Field::u64("name_len", name.len() as u64)]);

    Ok(Response::new(format!("Hello, {name}!")))
}

fn greeter_request(name: &str) -> Request<String> {
    let mut request = Request::new(name.to_string());
    request
        .extensions_mut()
        .insert(GrpcMethod::new("helloworld.Greeter", "SayHello"));
    request
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    config.validate()?;
    init_from_config(&config.telemetry)?;

    let format = if config.telemetry.json_logging {
        FieldFormat::Json
    } else {
        FieldFormat::Logfmt
    };
    let logger = CallLogger::new(Arc::new(TracingSink::new(format)));
    let options = InterceptorOptions::from_config(&config.interceptor)
        .context("invalid interceptor configuration")?;
    let interceptor = LoggingInterceptor::new(logger, options);

    tracing::info!(service = %config.telemetry.service_name, "running example calls");

    for name in ["world", ""] {
        let result = interceptor.serve_unary(greeter_request(name), say_hello).await;
        match result {
            Ok(response) => println!("unary reply: {}", response.into_inner()),
            Err(status) => println!("unary error: {}", status.message()),
        }
    }

    let mut request = Request::new(futures::stream::iter(
        ["north", "east", "south"].map(|heading| Ok::<_, Status>(heading.to_string())),
    ));
    request
        .extensions_mut()
        .insert(GrpcMethod::new("routeguide.RouteGuide", "RouteChat"));

    let response = interceptor.serve_streaming(request, 8, |mut stream| async move {
        let mut count = 0_u64;
        while let Some(heading) = stream.recv_msg().await? {
            count += 1;
            stream.send_msg(format!("heading {heading} noted")).await?;
        }
        ctxlog::add_fields(stream.context(), [Field::u64("notes", count)]);
        Ok::<_, Status>(())
    })
    .await;

    println!("stream headers: {} entries", response.metadata().len());
    let mut replies = response.into_inner();
    while let Some(reply) = replies.next().await {
        match reply {
            Ok(note) => println!("stream reply: {note}"),
            Err(status) => println!("stream error: {}", status.message()),
        }
    }

    Ok(())
}
