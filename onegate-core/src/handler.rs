use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::context::RpcContext;
use crate::error::Error;
use crate::extract::FromRpcContext;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A binary payload returned instead of the JSON envelope (exports,
/// downloads). The ingress maps it to a raw HTTP body with a
/// `Content-Disposition` header.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

/// What a handler produced: a JSON value destined for the result envelope,
/// or a file stream.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    File(FilePayload),
}

impl Reply {
    pub fn json(value: impl Serialize) -> Result<Reply, Error> {
        Ok(Reply::Json(serde_json::to_value(value).map_err(|e| {
            Error::internal("failed to serialize handler result").with_cause(e)
        })?))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Reply::Json(v) => Some(v),
            Reply::File(_) => None,
        }
    }
}

/// JSON marker wrapper for handler return values, in the axum style:
/// `Ok(Json(user))` serializes the payload into the envelope's `data`.
#[derive(Debug, Clone, Copy)]
pub struct Json<T>(pub T);

/// Conversion from a handler's return value into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply, Error>;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(self)
    }
}

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Result<Reply, Error> {
        Reply::json(self.0)
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::Json(self))
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::Json(Value::Null))
    }
}

impl IntoReply for FilePayload {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::File(self))
    }
}

/// A typed handler: an async function whose arguments all implement
/// [`FromRpcContext`] and whose return is `Result<impl IntoReply, Error>`.
///
/// The tuple of argument extractors is the handler's bind plan; it is fixed
/// at registration and executed per request, in declaration order.
pub trait Handler<Args>: Clone + Send + Sync + 'static {
    fn call(&self, ctx: RpcContext) -> impl Future<Output = Result<Reply, Error>> + Send;
}

macro_rules! impl_handler {
    ( $($ty:ident),* ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Fut, R, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Result<R, Error>> + Send,
            R: IntoReply,
            $( $ty: FromRpcContext + Send, )*
        {
            async fn call(&self, ctx: RpcContext) -> Result<Reply, Error> {
                $( let $ty = $ty::from_context(&ctx).await?; )*
                (self)($($ty,)*).await?.into_reply()
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);

// ── Type erasure ────────────────────────────────────────────────────────────

trait ErasedHandler: Send + Sync {
    fn call(&self, ctx: RpcContext) -> BoxFuture<'static, Result<Reply, Error>>;
}

struct HandlerAdapter<H, Args> {
    handler: H,
    _marker: PhantomData<fn() -> Args>,
}

impl<H, Args> ErasedHandler for HandlerAdapter<H, Args>
where
    H: Handler<Args>,
    Args: Send + Sync + 'static,
{
    fn call(&self, ctx: RpcContext) -> BoxFuture<'static, Result<Reply, Error>> {
        let handler = self.handler.clone();
        Box::pin(async move { handler.call(ctx).await })
    }
}

/// A registered handler with its bind plan erased, ready for storage in the
/// registry and per-request invocation.
#[derive(Clone)]
pub struct BoxedHandler(Arc<dyn ErasedHandler>);

impl BoxedHandler {
    pub fn new<H, Args>(handler: H) -> Self
    where
        H: Handler<Args>,
        Args: Send + Sync + 'static,
    {
        Self(Arc::new(HandlerAdapter {
            handler,
            _marker: PhantomData,
        }))
    }

    pub fn invoke(&self, ctx: RpcContext) -> BoxFuture<'static, Result<Reply, Error>> {
        self.0.call(ctx)
    }
}

impl std::fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxedHandler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RpcRequest;
    use serde_json::json;

    #[tokio::test]
    async fn zero_arg_handler_runs() {
        async fn hello() -> Result<Json<&'static str>, Error> {
            Ok(Json("hi"))
        }
        let boxed = BoxedHandler::new(hello);
        let ctx = RpcContext::builder(RpcRequest::new("demo", "hello")).build();
        let reply = boxed.invoke(ctx).await.unwrap();
        assert_eq!(reply.as_json().unwrap(), &json!("hi"));
    }

    #[tokio::test]
    async fn context_arg_handler_sees_request() {
        async fn echo(ctx: RpcContext) -> Result<Json<String>, Error> {
            Ok(Json(ctx.request().action.clone()))
        }
        let boxed = BoxedHandler::new(echo);
        let ctx = RpcContext::builder(RpcRequest::new("demo", "echo")).build();
        let reply = boxed.invoke(ctx).await.unwrap();
        assert_eq!(reply.as_json().unwrap(), &json!("echo"));
    }

    #[tokio::test]
    async fn unit_reply_is_null_data() {
        async fn noop() -> Result<(), Error> {
            Ok(())
        }
        let boxed = BoxedHandler::new(noop);
        let ctx = RpcContext::builder(RpcRequest::new("demo", "noop")).build();
        let reply = boxed.invoke(ctx).await.unwrap();
        assert!(reply.as_json().unwrap().is_null());
    }
}
