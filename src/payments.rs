use crate::{
    bus::{EventBus, NotificationLevel},
    entity::{Assignment, ASSIGNMENT_ACTIVE},
    error::{CoordinatorError, Result},
    store::Store,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// An order as returned by the `create-order` function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Serialize)]
struct VerifyBody<'a> {
    razorpay_order_id: &'a str,
    razorpay_payment_id: &'a str,
    razorpay_signature: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verified: bool,
}

/// A completed checkout as reported by the gateway's client callback.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub student_id: String,
    pub tutor_id: i64,
    pub amount: f64,
    pub currency: String,
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

/// Client for the two server-side payment functions. Order creation and
/// signature verification both live behind HTTPS; this side only reacts to
/// their JSON responses.
#[derive(Clone)]
pub struct PaymentsClient {
    http: reqwest::Client,
    base_url: String,
    store: Store,
    bus: Arc<EventBus>,
}

impl PaymentsClient {
    pub fn new(base_url: impl Into<String>, store: Store, bus: Arc<EventBus>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            store,
            bus,
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url.trim_end_matches('/'))
    }

    pub async fn create_order(&self, amount: i64, currency: &str, receipt: &str) -> Result<Order> {
        let order = self
            .http
            .post(self.endpoint("create-order"))
            .json(&CreateOrderBody { amount, currency, receipt })
            .send()
            .await?
            .error_for_status()?
            .json::<Order>()
            .await?;

        info!(order_id = %order.id, "payment order created");
        Ok(order)
    }

    pub async fn verify_payment(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool> {
        let response = self
            .http
            .post(self.endpoint("verify-payment"))
            .json(&VerifyBody {
                razorpay_order_id: order_id,
                razorpay_payment_id: payment_id,
                razorpay_signature: signature,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<VerifyResponse>()
            .await?;

        Ok(response.verified)
    }

    /// Finish a checkout: verify the signature, record the payment, then
    /// create the active assignment that entitles the student to this tutor.
    /// If the assignment insert fails the payment row is removed again.
    pub async fn complete_checkout(&self, checkout: &CheckoutRequest) -> Result<Assignment> {
        let verified = self
            .verify_payment(&checkout.order_id, &checkout.payment_id, &checkout.signature)
            .await?;
        if !verified {
            self.bus.notify(
                NotificationLevel::Error,
                "Payment verification failed.",
                Some(checkout.tutor_id),
            );
            return Err(CoordinatorError::PaymentRejected);
        }

        self.store
            .record_payment(
                &Uuid::new_v4().to_string(),
                &checkout.student_id,
                checkout.tutor_id,
                checkout.amount,
                &checkout.currency,
                &checkout.order_id,
                &checkout.payment_id,
            )
            .await?;

        let assignment = Assignment {
            id: Uuid::new_v4().to_string(),
            student_id: checkout.student_id.clone(),
            tutor_id: checkout.tutor_id,
            status: ASSIGNMENT_ACTIVE.into(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_assignment(&assignment).await {
            error!("assignment insert failed after payment, rolling payment back: {e}");
            if let Err(del) = self.store.delete_payment(&checkout.payment_id).await {
                error!("payment rollback also failed: {del}");
            }
            return Err(e);
        }

        self.bus.notify(
            NotificationLevel::Success,
            "Payment successful! Your subscription has been activated.",
            Some(checkout.tutor_id),
        );
        Ok(assignment)
    }
}
