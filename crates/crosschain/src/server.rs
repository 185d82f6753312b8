//! Serving cross-chain calls into a chain during an atomic transaction.

use crate::ChainChannels;
use polychain_core::{EntryPoint, Invocation};
use polychain_engine::{ContractEngine, ExecutionContext, SharedContext};
use polychain_types::{
    ChainId, CrossChainCallRequest, CrossChainCallRequestIndexed, CrossChainCallResponse,
    CrossChainCallResponseIndexed, Hash,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Dispatch the cross-chain entry point of `request.to` against `ctx`.
///
/// Query calls run against a branch of `ctx`, so their writes are dropped.
/// A failing target execution is reported inside the response.
pub(crate) async fn dispatch(
    engine: &dyn ContractEngine,
    ctx: &mut ExecutionContext,
    request: &CrossChainCallRequest,
) -> CrossChainCallResponse {
    let payload = match serde_json::to_vec(request) {
        Ok(payload) => payload,
        Err(e) => return CrossChainCallResponse::failed(e.to_string()),
    };
    let invocation = Invocation {
        entry_point: EntryPoint::CrossChain,
        contract: request.to.clone(),
        caller: request.from.clone(),
        payload,
        dependencies: request.dependencies.clone(),
        background: false,
    };

    let outcome = if request.is_query {
        let mut branch = ctx.branch();
        engine.invoke_entry_point(&mut branch, invocation).await
    } else {
        engine.invoke_entry_point(ctx, invocation).await
    };

    match outcome {
        Ok(data) => CrossChainCallResponse::ok(data),
        Err(e) => {
            debug!(
                to = %request.to,
                to_chain_id = %request.to_chain_id,
                error = %e,
                "Cross-chain entry point failed"
            );
            CrossChainCallResponse::failed(e.to_string())
        }
    }
}

/// Background task draining a chain's cross-call-request channel for one
/// atomic transaction.
pub(crate) struct CallServer {
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CallServer {
    pub(crate) fn spawn(
        chain_id: ChainId,
        atomic_tx: Hash,
        channels: Arc<ChainChannels>,
        ctx: SharedContext,
        engine: Arc<dyn ContractEngine>,
    ) -> Self {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(serve(chain_id, atomic_tx, channels, ctx, engine, stop.clone()));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop serving and wait for the task to exit.
    pub(crate) async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cross-chain call server panicked");
            }
        }
    }
}

impl Drop for CallServer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

enum Route {
    /// A waiting execution of this chain took the call and answers it.
    Handed,
    Served(CrossChainCallResponse),
    Stopped,
}

/// Run `indexed` on the shared context, or hand it to an execution of this
/// chain that holds the context while waiting on an outbound call.
async fn route(
    channels: &ChainChannels,
    ctx: &SharedContext,
    engine: &dyn ContractEngine,
    stop: &CancellationToken,
    mut indexed: CrossChainCallRequestIndexed,
) -> Route {
    loop {
        let registered = channels.waiter_registered();
        tokio::pin!(registered);
        registered.as_mut().enable();

        if let Some(waiter) = channels.innermost_waiter() {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return Route::Stopped,
                sent = waiter.send(indexed) => match sent {
                    Ok(()) => return Route::Handed,
                    // The waiter left; its call completed meanwhile.
                    Err(returned) => {
                        indexed = returned.0;
                        continue;
                    }
                },
            }
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => return Route::Stopped,
            _ = registered.as_mut() => continue,
            guard = ctx.lock() => {
                let mut guard = guard;
                return Route::Served(dispatch(engine, &mut guard, &indexed.request).await);
            }
        }
    }
}

async fn serve(
    chain_id: ChainId,
    atomic_tx: Hash,
    channels: Arc<ChainChannels>,
    ctx: SharedContext,
    engine: Arc<dyn ContractEngine>,
    stop: CancellationToken,
) {
    let mut requests = tokio::select! {
        guard = channels.requests_rx().lock() => guard,
        _ = stop.cancelled() => return,
    };
    let responses = channels.responses_tx();
    trace!(chain_id = %chain_id, atomic_tx = %atomic_tx, "Serving cross-chain calls");

    loop {
        let indexed = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = requests.recv() => match next {
                Some(indexed) => indexed,
                None => break,
            },
        };

        if indexed.key.atomic_tx != atomic_tx {
            warn!(
                chain_id = %chain_id,
                key = %indexed.key,
                "Ignoring cross-chain call of another atomic transaction"
            );
            continue;
        }

        debug!(
            chain_id = %chain_id,
            key = %indexed.key,
            from = %indexed.request.from,
            to = %indexed.request.to,
            is_query = indexed.request.is_query,
            "Serving cross-chain call"
        );

        let response = match route(&channels, &ctx, engine.as_ref(), &stop, indexed.clone()).await {
            Route::Stopped => break,
            Route::Handed => {
                debug!(chain_id = %chain_id, key = %indexed.key, "Handed cross-chain call to waiting execution");
                continue;
            }
            Route::Served(response) => response,
        };

        let reply = CrossChainCallResponseIndexed {
            key: indexed.key,
            response,
        };
        tokio::select! {
            _ = stop.cancelled() => break,
            sent = responses.send(reply) => if sent.is_err() {
                break;
            },
        }
    }
    trace!(chain_id = %chain_id, atomic_tx = %atomic_tx, "Cross-chain call server stopped");
}
