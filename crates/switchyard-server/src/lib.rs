//! HTTP front end for the Switchyard gateway.

pub mod config;
pub mod http;

use switchyard_core::{Dispatcher, EventType, Flow, Gateway};

use crate::config::ServerConfig;

/// Handlers the server installs on its own.
pub fn dispatcher(config: &ServerConfig) -> Dispatcher {
    let dispatcher = Dispatcher::new();
    match config.welcome.clone() {
        Some(welcome) => dispatcher.on_event_fn(EventType::Subscribe, move |ctx, _event| {
            ctx.writer().text(&welcome)?;
            Ok(Flow::Continue)
        }),
        None => dispatcher,
    }
}

pub fn build_gateway(config: &ServerConfig) -> anyhow::Result<Gateway> {
    let gateway = Gateway::builder(config.gateway.clone())
        .with_dispatcher(dispatcher(config))
        .build()?;
    Ok(gateway)
}
