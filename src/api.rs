use crate::stores::{IdempotentData, IdempotentEngineStore};
use crate::{ApiError, ApiResponse, GatewayEngine};
use bytes::Bytes;
use log::error;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use warp::{
    filters::BoxedFilter,
    http::{header::CONTENT_TYPE, HeaderValue},
    hyper::Body,
    reply::Response,
    Filter,
};

/// # Gateway API
///
/// Warp filter exposing the bridge endpoints:
///
/// - `POST /builder`
/// - `POST /payment` (optional `Idempotency-Key` header)
/// - `POST /authorize` (optional `Idempotency-Key` header)
/// - `POST /create-keypair`
/// - `POST /reprocess`
/// - `GET /tx_status?id=`
///
/// Every reply is JSON. Failures are rendered as `{"code", "message", "data"}`.
pub fn create_gateway_filter<E, S>(engine: E, store: S) -> BoxedFilter<(Response,)>
where
    E: GatewayEngine + Clone + Send + Sync + 'static,
    S: IdempotentEngineStore + Clone + Send + Sync + 'static,
{
    let with_store = warp::any().map(move || store.clone()).boxed();
    let with_engine = warp::any().map(move || engine.clone()).boxed();
    let idempotency = warp::header::optional::<String>("idempotency-key");

    // POST /builder
    let builder = warp::post()
        .and(warp::path("builder"))
        .and(warp::path::end())
        .and(warp::body::bytes())
        .and(with_engine.clone())
        .then(|body: Bytes, engine: E| async move {
            into_response(engine.build_transaction(body).await)
        });

    // POST /payment (optional idempotency-key header)
    let payment = warp::post()
        .and(warp::path("payment"))
        .and(warp::path::end())
        .and(idempotency)
        .and(warp::body::bytes())
        .and(with_engine.clone())
        .and(with_store.clone())
        .then(
            |idempotency_key: Option<String>, body: Bytes, engine: E, store: S| async move {
                let input_hash = get_hash_of(b"payment", &body);
                let send_payment_fn = move || async move { engine.send_payment(body).await };
                into_response(
                    make_idempotent_call(store, send_payment_fn, input_hash, idempotency_key)
                        .await,
                )
            },
        );

    // POST /authorize (optional idempotency-key header)
    let authorize = warp::post()
        .and(warp::path("authorize"))
        .and(warp::path::end())
        .and(idempotency)
        .and(warp::body::bytes())
        .and(with_engine.clone())
        .and(with_store)
        .then(
            |idempotency_key: Option<String>, body: Bytes, engine: E, store: S| async move {
                let input_hash = get_hash_of(b"authorize", &body);
                let authorize_fn = move || async move { engine.authorize(body).await };
                into_response(
                    make_idempotent_call(store, authorize_fn, input_hash, idempotency_key).await,
                )
            },
        );

    // POST /create-keypair
    let create_keypair = warp::post()
        .and(warp::path("create-keypair"))
        .and(warp::path::end())
        .and(with_engine.clone())
        .then(|engine: E| async move { into_response(engine.create_keypair().await) });

    // POST /reprocess
    let reprocess = warp::post()
        .and(warp::path("reprocess"))
        .and(warp::path::end())
        .and(warp::body::bytes())
        .and(with_engine.clone())
        .then(|body: Bytes, engine: E| async move {
            into_response(engine.reprocess(body).await)
        });

    // GET /tx_status?id=
    let tx_status = warp::get()
        .and(warp::path("tx_status"))
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_engine)
        .then(|query: HashMap<String, String>, engine: E| async move {
            into_response(engine.tx_status(query.get("id").cloned()).await)
        });

    builder
        .or(payment)
        .unify()
        .or(authorize)
        .unify()
        .or(create_keypair)
        .unify()
        .or(reprocess)
        .unify()
        .or(tx_status)
        .unify()
        .boxed()
}

fn into_response(result: Result<ApiResponse, ApiError>) -> Response {
    let (status, body) = match result {
        Ok(ret) => ret,
        Err(err) => (err.status, err.to_body()),
    };
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

// Helper function that returns any idempotent data that corresponds to a
// provided idempotency key. It fails if the hash of the input that
// generated the idempotent data does not match the hash of the provided input.
async fn check_idempotency<S>(
    store: &S,
    idempotency_key: String,
    input_hash: [u8; 32],
) -> Result<Option<ApiResponse>, ApiError>
where
    S: IdempotentEngineStore + Clone + Send + Sync + 'static,
{
    let ret: Option<IdempotentData> = store
        .load_idempotent_data(idempotency_key.clone())
        .await
        .map_err(|err| {
            error!(
                "Couldn't load idempotent data for idempotency key {:?}: {}",
                idempotency_key, err
            );
            ApiError::internal_server_error()
        })?;

    match ret {
        Some(ret) if ret.input_hash == input_hash => {
            Ok(Some((ret.status(), Bytes::from(ret.body))))
        }
        Some(_) => Err(ApiError::idempotency_conflict()),
        None => Ok(None),
    }
}

async fn make_idempotent_call<S, F, Fut>(
    store: S,
    f: F,
    input_hash: [u8; 32],
    idempotency_key: Option<String>,
) -> Result<ApiResponse, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ApiResponse, ApiError>>,
    S: IdempotentEngineStore + Clone + Send + Sync + 'static,
{
    // Without a key just make the call, nothing is saved
    let idempotency_key = match idempotency_key {
        Some(key) => key,
        None => return f().await,
    };

    if let Some(ret) = check_idempotency(&store, idempotency_key.clone(), input_hash).await? {
        return Ok(ret);
    }

    let result = f().await;
    let (status, body) = match &result {
        Ok((status, body)) => (*status, body.clone()),
        Err(err) => (err.status, err.to_body()),
    };
    // Server errors are not final, the client is allowed to retry them
    if !status.is_server_error() {
        if let Err(err) = store
            .save_idempotent_data(idempotency_key.clone(), input_hash, status, body)
            .await
        {
            error!(
                "Couldn't save idempotent data for idempotency key {:?}: {}",
                idempotency_key, err
            );
        }
    }
    result
}

fn get_hash_of(route: &[u8], preimage: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(route);
    hasher.update(preimage);
    hasher.finalize().into()
}
