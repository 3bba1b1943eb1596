//! The `Arith` demo service.

use std::future::Future;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tern_codec::ServerCodec;
use tern_rpc::Server;

use crate::metrics;

/// Operands of every `Arith` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Args {
    #[serde(rename = "A")]
    pub a: i64,
    #[serde(rename = "B")]
    pub b: i64,
}

/// Register `Arith.Add`, `Arith.Sub`, `Arith.Mul` and `Arith.Div`.
pub fn register<C: ServerCodec + 'static>(server: &Server<C>) {
    instrumented(server, "Arith.Add", |args: Args| async move {
        args.a.checked_add(args.b).ok_or_else(overflow)
    });
    instrumented(server, "Arith.Sub", |args: Args| async move {
        args.a.checked_sub(args.b).ok_or_else(overflow)
    });
    instrumented(server, "Arith.Mul", |args: Args| async move {
        args.a.checked_mul(args.b).ok_or_else(overflow)
    });
    instrumented(server, "Arith.Div", |args: Args| async move {
        if args.b == 0 {
            return Err("divide by zero".to_string());
        }
        args.a.checked_div(args.b).ok_or_else(overflow)
    });
}

fn overflow() -> String {
    "integer overflow".to_string()
}

/// Register `handler`, recording call metrics around it.
fn instrumented<C, A, R, F, Fut>(server: &Server<C>, method: &'static str, handler: F)
where
    C: ServerCodec + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, String>> + Send + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + Sync + 'static,
{
    server.register(method, move |args: A| {
        let started = Instant::now();
        let call = handler(args);
        async move {
            let result = call.await;
            metrics::record_call(method, started.elapsed().as_secs_f64(), result.is_ok());
            result
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_codec::{StreamClientCodec, StreamServerCodec};
    use tern_protocol::CompressType;
    use tern_rpc::{Client, RpcError};
    use tokio::io::{duplex, DuplexStream};

    fn start() -> Client<StreamClientCodec<DuplexStream>> {
        let (client_io, server_io) = duplex(16 * 1024);
        let server = Server::new();
        register(&server);
        tokio::spawn(async move { server.serve_conn(StreamServerCodec::new(server_io)).await });
        Client::new(StreamClientCodec::new(client_io, CompressType::GZIP))
    }

    async fn arith(
        client: &Client<StreamClientCodec<DuplexStream>>,
        op: &str,
        a: i64,
        b: i64,
    ) -> Result<i64, RpcError> {
        client.call(&format!("Arith.{}", op), &Args { a, b }).await
    }

    #[tokio::test]
    async fn test_operations() {
        let client = start();
        assert_eq!(arith(&client, "Add", 1, 2).await.unwrap(), 3);
        assert_eq!(arith(&client, "Sub", 1, 2).await.unwrap(), -1);
        assert_eq!(arith(&client, "Mul", -4, 5).await.unwrap(), -20);
        assert_eq!(arith(&client, "Div", 9, 2).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_errors() {
        let client = start();
        let err = arith(&client, "Div", 1, 0).await.unwrap_err();
        assert_eq!(err.remote_message(), Some("divide by zero"));

        let err = arith(&client, "Add", i64::MAX, 1).await.unwrap_err();
        assert_eq!(err.remote_message(), Some("integer overflow"));

        let err = arith(&client, "Div", i64::MIN, -1).await.unwrap_err();
        assert_eq!(err.remote_message(), Some("integer overflow"));
    }

    #[test]
    fn test_args_use_capitalized_field_names() {
        let bytes = rmp_serde::to_vec_named(&Args { a: 1, b: 2 }).unwrap();
        // fixmap(2), "A", 1, "B", 2
        assert_eq!(bytes, vec![0x82, 0xa1, b'A', 0x01, 0xa1, b'B', 0x02]);
    }
}
