use super::{classify_failure, PaymentError, PaymentGateway, TransferReceipt, TransferRequest};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const BUS_PAYMENTS_SECRET_HEADER: &str = "X-Bus-Payments-Internal-Secret";

/// Client for the payments service bus-only `POST /internal/bus/bookings/transfer` endpoint.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    http: Client,
    base_url: String,
    internal_secret: Option<String>,
    service_id: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        internal_secret: Option<String>,
        service_id: &str,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            internal_secret: internal_secret.filter(|s| !s.trim().is_empty()),
            service_id: service_id.trim().to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn transfer(&self, req: TransferRequest) -> Result<TransferReceipt, PaymentError> {
        let url = format!("{}/internal/bus/bookings/transfer", self.base_url);
        let mut call = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "booking_id": req.booking_id,
                "action": req.action.as_str(),
                "from_wallet_id": req.from_wallet,
                "to_wallet_id": req.to_wallet,
                "amount_cents": req.amount_cents,
            }))
            .header("Idempotency-Key", &req.idempotency_key)
            .header("X-Ref", &req.reference)
            .header("X-Merchant", "bus");
        if let Some(secret) = self.internal_secret.as_deref() {
            call = call.header(BUS_PAYMENTS_SECRET_HEADER, secret);
        }
        if !self.service_id.is_empty() {
            call = call.header("X-Internal-Service-Id", &self.service_id);
        }

        let resp = call.send().await.map_err(|e| {
            tracing::warn!(error = %e, key = %req.idempotency_key, "payments transfer http error");
            if e.is_timeout() {
                PaymentError::Timeout
            } else {
                PaymentError::Other("payments unreachable".to_string())
            }
        })?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            tracing::warn!(error = %e, "payments transfer body read failed");
            if e.is_timeout() {
                PaymentError::Timeout
            } else {
                PaymentError::Other("payments response unreadable".to_string())
            }
        })?;

        if !status.is_success() {
            let detail = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
                .unwrap_or(body);
            tracing::warn!(%status, key = %req.idempotency_key, "payments transfer rejected");
            return Err(classify_failure(&detail));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "payments transfer invalid json");
            PaymentError::Other("invalid payments response".to_string())
        })?;
        let txn_id = parsed
            .get("txn_id")
            .or_else(|| parsed.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(TransferReceipt { txn_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
    }

    fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    async fn spawn_mock_payments(
        status_line: &str,
        response_body: &str,
    ) -> (String, oneshot::Receiver<CapturedRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel();
        let status_line = status_line.to_string();
        let response_body = response_body.to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf: Vec<u8> = Vec::new();
            let mut tmp = [0u8; 2048];
            let header_end = loop {
                let n = stream.read(&mut tmp).await.expect("read");
                if n == 0 {
                    break None;
                }
                buf.extend_from_slice(&tmp[..n]);
                if let Some(i) = find_subsequence(&buf, b"\r\n\r\n") {
                    break Some(i);
                }
            };
            let Some(header_end) = header_end else {
                return;
            };

            let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let mut lines = header_text.split("\r\n");
            let mut request_line = lines.next().unwrap_or_default().split_whitespace();
            let method = request_line.next().unwrap_or_default().to_string();
            let path = request_line.next().unwrap_or_default().to_string();
            let headers: HashMap<String, String> = lines
                .filter_map(|l| l.split_once(':'))
                .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                .collect();

            let content_len = headers
                .get("content-length")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            let mut body = buf[(header_end + 4)..].to_vec();
            while body.len() < content_len {
                let n = stream.read(&mut tmp).await.expect("read body");
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&tmp[..n]);
            }
            body.truncate(content_len);

            let _ = tx.send(CapturedRequest {
                method,
                path,
                headers,
                body: String::from_utf8_lossy(&body).to_string(),
            });

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                response_body.len(),
                response_body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.flush().await;
        });

        (format!("http://{addr}"), rx)
    }

    fn gateway(base_url: &str) -> HttpPaymentGateway {
        HttpPaymentGateway::new(
            base_url,
            Duration::from_secs(5),
            Some("bus-binding-secret".to_string()),
            "bus",
        )
        .expect("client")
    }

    #[tokio::test]
    async fn charge_sends_idempotency_key_and_binding_headers() {
        let (base_url, rx) = spawn_mock_payments("200 OK", "{\"txn_id\":\"tx-charge-1\"}").await;
        let booking_id = "550e8400-e29b-41d4-a716-446655440000";

        let receipt = gateway(&base_url)
            .transfer(TransferRequest::booking_charge(
                booking_id,
                "wallet-from",
                "wallet-to",
                12_500,
            ))
            .await
            .expect("transfer");
        assert_eq!(receipt.txn_id.as_deref(), Some("tx-charge-1"));

        let captured = rx.await.expect("captured request");
        assert_eq!(captured.method, "POST");
        assert_eq!(captured.path, "/internal/bus/bookings/transfer");
        assert_eq!(
            captured.headers.get("idempotency-key").map(String::as_str),
            Some("bus-book-550e8400-e29b-41d4-a716-446655440000")
        );
        assert_eq!(
            captured
                .headers
                .get("x-bus-payments-internal-secret")
                .map(String::as_str),
            Some("bus-binding-secret")
        );
        assert_eq!(
            captured.headers.get("x-internal-service-id").map(String::as_str),
            Some("bus")
        );
        assert_eq!(captured.headers.get("x-merchant").map(String::as_str), Some("bus"));

        let body: serde_json::Value = serde_json::from_str(&captured.body).expect("json body");
        assert_eq!(body["booking_id"], booking_id);
        assert_eq!(body["action"], "charge");
        assert_eq!(body["from_wallet_id"], "wallet-from");
        assert_eq!(body["to_wallet_id"], "wallet-to");
        assert_eq!(body["amount_cents"], 12_500);
    }

    #[tokio::test]
    async fn insufficient_funds_detail_is_normalized() {
        let (base_url, _rx) =
            spawn_mock_payments("400 Bad Request", "{\"detail\":\"insufficient funds\"}").await;
        let err = gateway(&base_url)
            .transfer(TransferRequest::booking_charge("b", "a", "c", 100))
            .await
            .expect_err("must fail");
        assert_eq!(err, PaymentError::InsufficientFunds);
    }

    #[tokio::test]
    async fn server_error_without_detail_is_other() {
        let (base_url, _rx) = spawn_mock_payments("500 Internal Server Error", "oops").await;
        let err = gateway(&base_url)
            .transfer(TransferRequest::booking_refund("b", "op", "rider", 100))
            .await
            .expect_err("must fail");
        assert!(matches!(err, PaymentError::Other(_)));
    }

    #[tokio::test]
    async fn refund_posts_refund_action_to_bus_endpoint() {
        let (base_url, rx) = spawn_mock_payments("200 OK", "{\"txn_id\":\"tx-refund-1\"}").await;

        gateway(&base_url)
            .transfer(TransferRequest::booking_refund("bk-7", "op-wallet", "rider-wallet", 900))
            .await
            .expect("refund");

        let captured = rx.await.expect("captured request");
        assert_eq!(captured.path, "/internal/bus/bookings/transfer");
        assert_eq!(
            captured.headers.get("idempotency-key").map(String::as_str),
            Some("bus-refund-bk-7")
        );
        let body: serde_json::Value = serde_json::from_str(&captured.body).expect("json body");
        assert_eq!(body["booking_id"], "bk-7");
        assert_eq!(body["action"], "refund");
        assert_eq!(body["from_wallet_id"], "op-wallet");
        assert_eq!(body["to_wallet_id"], "rider-wallet");
    }

    #[tokio::test]
    async fn txn_id_falls_back_to_id_field() {
        let (base_url, _rx) = spawn_mock_payments("200 OK", "{\"id\":\"tx-9\"}").await;
        let receipt = gateway(&base_url)
            .transfer(TransferRequest::booking_charge("b", "a", "c", 100))
            .await
            .expect("transfer");
        assert_eq!(receipt.txn_id.as_deref(), Some("tx-9"));
    }
}
