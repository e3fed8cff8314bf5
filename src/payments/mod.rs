//! Payment collaborator: invoices are issued through a [`PaymentGateway`]
//! and settled by a signed inbound webhook.

pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Invoice {
    pub invoice_ref: String,
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Issues an invoice and returns the gateway's reference for it.
    async fn create_invoice(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<String, AppError>;
}

/// In-process gateway that keeps issued invoices in memory.
#[derive(Default)]
pub struct InvoiceBook {
    invoices: DashMap<String, Invoice>,
}

impl InvoiceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, invoice_ref: &str) -> Option<Invoice> {
        self.invoices.get(invoice_ref).map(|invoice| invoice.clone())
    }

    pub fn len(&self) -> usize {
        self.invoices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }
}

#[async_trait]
impl PaymentGateway for InvoiceBook {
    async fn create_invoice(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<String, AppError> {
        if amount < 0 {
            return Err(AppError::InvalidInput(format!(
                "invoice amount must not be negative, got {amount}"
            )));
        }

        let invoice_ref = format!("inv_{}", Uuid::new_v4().simple());
        self.invoices.insert(
            invoice_ref.clone(),
            Invoice {
                invoice_ref: invoice_ref.clone(),
                order_id,
                amount,
                currency: currency.to_string(),
                created_at: Utc::now(),
            },
        );
        info!(order_id = %order_id, invoice_ref = %invoice_ref, amount, currency, "invoice issued");
        Ok(invoice_ref)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{InvoiceBook, PaymentGateway};
    use crate::error::AppError;

    #[tokio::test]
    async fn issued_invoices_are_recorded() {
        let book = InvoiceBook::new();
        let order_id = Uuid::new_v4();

        let invoice_ref = book.create_invoice(order_id, 2_300, "EUR").await.unwrap();

        assert!(invoice_ref.starts_with("inv_"));
        let invoice = book.get(&invoice_ref).unwrap();
        assert_eq!(invoice.order_id, order_id);
        assert_eq!(invoice.amount, 2_300);
        assert_eq!(invoice.currency, "EUR");
    }

    #[tokio::test]
    async fn negative_amount_is_rejected() {
        let book = InvoiceBook::new();
        let result = book.create_invoice(Uuid::new_v4(), -1, "EUR").await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert!(book.is_empty());
    }
}
