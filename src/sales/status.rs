//! Status transition tables for sales documents.

use crate::core::shared::error::ApiError;

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub action: &'static str,
    pub from: &'static [&'static str],
    pub to: &'static str,
}

pub const QUOTE_STATUSES: &[&str] = &["draft", "sent", "accepted", "rejected", "converted"];

pub const QUOTE_TRANSITIONS: &[Transition] = &[
    Transition { action: "send", from: &["draft"], to: "sent" },
    Transition { action: "accept", from: &["draft", "sent"], to: "accepted" },
    Transition { action: "reject", from: &["draft", "sent"], to: "rejected" },
    Transition { action: "convert", from: &["accepted"], to: "converted" },
];

pub const ORDER_STATUSES: &[&str] = &["draft", "confirmed", "fulfilled", "cancelled"];

pub const ORDER_TRANSITIONS: &[Transition] = &[
    Transition { action: "confirm", from: &["draft"], to: "confirmed" },
    Transition { action: "fulfill", from: &["confirmed"], to: "fulfilled" },
    Transition { action: "cancel", from: &["draft", "confirmed"], to: "cancelled" },
];

/// Orders that may be billed.
pub const INVOICEABLE_ORDER_STATUSES: &[&str] = &["confirmed", "fulfilled"];

pub const INVOICE_STATUSES: &[&str] = &["draft", "sent", "partial", "paid", "void"];

pub const INVOICE_TRANSITIONS: &[Transition] = &[
    Transition { action: "send", from: &["draft"], to: "sent" },
    Transition { action: "void", from: &["draft", "sent"], to: "void" },
];

/// Invoices that still expect money.
pub const OPEN_INVOICE_STATUSES: &[&str] = &["sent", "partial"];

/// Invoices that accept a payment.
pub const PAYABLE_INVOICE_STATUSES: &[&str] = &["draft", "sent", "partial"];

pub const PAYMENT_STATUSES: &[&str] = &["completed", "refunded"];

/// Resolves the status `action` leads to from `current`, or a conflict naming
/// the document and its status.
pub fn next_status(
    table: &[Transition],
    document: &str,
    action: &str,
    current: &str,
) -> Result<&'static str, ApiError> {
    let transition = table
        .iter()
        .find(|t| t.action == action)
        .ok_or_else(|| ApiError::validation(format!("Unknown {document} action '{action}'")))?;
    if transition.from.contains(&current) {
        Ok(transition.to)
    } else {
        Err(ApiError::Conflict(format!(
            "Cannot {action} a {document} that is {current}"
        )))
    }
}

/// Header fields and lines can only change while a document is a draft.
pub fn ensure_draft(document: &str, current: &str) -> Result<(), ApiError> {
    if current == "draft" {
        Ok(())
    } else {
        Err(ApiError::Conflict(format!(
            "Only draft {document}s can be edited; this one is {current}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets_are_known(table: &[Transition], statuses: &[&str]) {
        for t in table {
            assert!(statuses.contains(&t.to), "{} -> {}", t.action, t.to);
            for from in t.from {
                assert!(statuses.contains(from), "{} from {}", t.action, from);
            }
        }
    }

    #[test]
    fn test_tables_only_use_known_statuses() {
        targets_are_known(QUOTE_TRANSITIONS, QUOTE_STATUSES);
        targets_are_known(ORDER_TRANSITIONS, ORDER_STATUSES);
        targets_are_known(INVOICE_TRANSITIONS, INVOICE_STATUSES);
    }

    #[test]
    fn test_quote_lifecycle() {
        let sent = next_status(QUOTE_TRANSITIONS, "quote", "send", "draft").expect("send");
        assert_eq!(sent, "sent");
        let accepted = next_status(QUOTE_TRANSITIONS, "quote", "accept", sent).expect("accept");
        assert_eq!(
            next_status(QUOTE_TRANSITIONS, "quote", "convert", accepted).expect("convert"),
            "converted"
        );
        assert!(matches!(
            next_status(QUOTE_TRANSITIONS, "quote", "convert", "sent"),
            Err(ApiError::Conflict(_))
        ));
        assert!(next_status(QUOTE_TRANSITIONS, "quote", "send", "rejected").is_err());
    }

    #[test]
    fn test_order_cannot_be_cancelled_after_fulfilment() {
        assert_eq!(
            next_status(ORDER_TRANSITIONS, "order", "cancel", "confirmed").expect("cancel"),
            "cancelled"
        );
        assert!(next_status(ORDER_TRANSITIONS, "order", "cancel", "fulfilled").is_err());
        assert!(next_status(ORDER_TRANSITIONS, "order", "fulfill", "draft").is_err());
    }

    #[test]
    fn test_paid_invoice_cannot_be_voided() {
        assert!(next_status(INVOICE_TRANSITIONS, "invoice", "void", "sent").is_ok());
        assert!(next_status(INVOICE_TRANSITIONS, "invoice", "void", "paid").is_err());
        assert!(next_status(INVOICE_TRANSITIONS, "invoice", "void", "partial").is_err());
    }

    #[test]
    fn test_unknown_action_is_validation_error() {
        assert!(matches!(
            next_status(INVOICE_TRANSITIONS, "invoice", "archive", "draft"),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn test_ensure_draft() {
        assert!(ensure_draft("quote", "draft").is_ok());
        assert!(matches!(ensure_draft("quote", "sent"), Err(ApiError::Conflict(_))));
    }
}
