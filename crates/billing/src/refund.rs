//! Order refunds
//!
//! Returns to a client whatever is still charged to one order. The
//! refundable amount is resolved by the store under the account lock, so two
//! concurrent refunds of the same order credit it once.

use rust_decimal::Decimal;

use crate::accounting::LedgerOp;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{description_or, CreditLedger, LedgerReceipt, PostingContext};
use crate::store::{LedgerStore, PostingDraft};
use crate::transactions::{CreditTransaction, TransactionType};

/// Net amount still charged to `order_id`: its deductions minus its refunds.
pub fn net_charged(transactions: &[CreditTransaction], order_id: &str) -> Decimal {
    transactions
        .iter()
        .filter(|tx| tx.order_id.as_deref() == Some(order_id))
        .fold(Decimal::ZERO, |net, tx| match tx.kind {
            TransactionType::Deduct => net + tx.amount,
            TransactionType::Refund => net - tx.amount,
            TransactionType::Add | TransactionType::Reset => net,
        })
}

impl<S: LedgerStore> CreditLedger<S> {
    /// Refund the credits still charged to an order.
    ///
    /// Fails with [`LedgerError::NothingToRefund`] when the order has no net
    /// charge, which makes repeated calls harmless.
    pub async fn refund_order(
        &self,
        client_id: &str,
        order_id: &str,
        reason: Option<&str>,
        ctx: &PostingContext,
    ) -> LedgerResult<LedgerReceipt> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Err(LedgerError::NothingToRefund(String::new()));
        }

        let draft = PostingDraft {
            op: LedgerOp::RefundOrder {
                order_id: order_id.to_string(),
            },
            client_name: ctx.client_name_for(client_id),
            description: description_or(reason.unwrap_or_default(), || {
                format!("Refund for order {}", order_id)
            }),
            feature: None,
            order_id: Some(order_id.to_string()),
            user_id: ctx.user_id.clone(),
        };

        match self.post(client_id, draft).await {
            Ok(receipt) => {
                tracing::info!(
                    client_id = %client_id,
                    order_id = %order_id,
                    amount = %receipt.transaction.amount,
                    new_balance = %receipt.new_balance,
                    user_id = ?ctx.user_id,
                    "Order refunded"
                );
                Ok(receipt)
            }
            Err(LedgerError::NothingToRefund(id)) => {
                tracing::warn!(
                    client_id = %client_id,
                    order_id = %id,
                    "Refund requested for order with no outstanding charge"
                );
                Err(LedgerError::NothingToRefund(id))
            }
            Err(e) => Err(e),
        }
    }
}
