//! Reference checks between CRM records, and the unlinking that keeps those
//! references valid when a parent record is soft-deleted.

use chrono::{DateTime, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use uuid::Uuid;

use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{
    crm_accounts, crm_activities, crm_contacts, crm_deals, crm_leads, crm_territories,
    sales_invoices, sales_orders, sales_quotes,
};

fn missing_reference(entity: &str, id: Uuid) -> ApiError {
    ApiError::validation(format!("{entity} {id} does not exist in this company"))
}

/// A referenced record must belong to the company and not be deleted.
macro_rules! ensure_exists {
    ($name:ident, $table:ident, $entity:literal) => {
        pub(crate) fn $name(
            conn: &mut PgConnection,
            org_id: Uuid,
            id: Option<Uuid>,
        ) -> Result<(), ApiError> {
            let Some(id) = id else { return Ok(()) };
            let found: bool = diesel::select(exists(
                $table::table
                    .filter($table::id.eq(id))
                    .filter($table::org_id.eq(org_id))
                    .filter($table::deleted_at.is_null()),
            ))
            .get_result(conn)?;
            if found {
                Ok(())
            } else {
                Err(missing_reference($entity, id))
            }
        }
    };
}

ensure_exists!(ensure_account, crm_accounts, "Account");
ensure_exists!(ensure_contact, crm_contacts, "Contact");
ensure_exists!(ensure_lead, crm_leads, "Lead");
ensure_exists!(ensure_deal, crm_deals, "Deal");
ensure_exists!(ensure_territory, crm_territories, "Territory");

/// A record other records can point at through a nullable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parent {
    Account,
    Contact,
    Lead,
    Deal,
}

/// One nullable foreign-key column, named `<Child><Parent>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    ContactAccount,
    LeadAccount,
    LeadContact,
    LeadConvertedDeal,
    DealAccount,
    DealContact,
    DealLead,
    ActivityAccount,
    ActivityContact,
    ActivityLead,
    ActivityDeal,
    QuoteAccount,
    QuoteContact,
    QuoteDeal,
    OrderAccount,
    OrderContact,
    OrderDeal,
    InvoiceAccount,
    InvoiceContact,
}

impl Link {
    pub(crate) const ALL: [Link; 19] = [
        Link::ContactAccount,
        Link::LeadAccount,
        Link::LeadContact,
        Link::LeadConvertedDeal,
        Link::DealAccount,
        Link::DealContact,
        Link::DealLead,
        Link::ActivityAccount,
        Link::ActivityContact,
        Link::ActivityLead,
        Link::ActivityDeal,
        Link::QuoteAccount,
        Link::QuoteContact,
        Link::QuoteDeal,
        Link::OrderAccount,
        Link::OrderContact,
        Link::OrderDeal,
        Link::InvoiceAccount,
        Link::InvoiceContact,
    ];

    pub(crate) fn parent(self) -> Parent {
        match self {
            Link::ContactAccount
            | Link::LeadAccount
            | Link::DealAccount
            | Link::ActivityAccount
            | Link::QuoteAccount
            | Link::OrderAccount
            | Link::InvoiceAccount => Parent::Account,
            Link::LeadContact
            | Link::DealContact
            | Link::ActivityContact
            | Link::QuoteContact
            | Link::OrderContact
            | Link::InvoiceContact => Parent::Contact,
            Link::DealLead | Link::ActivityLead => Parent::Lead,
            Link::LeadConvertedDeal | Link::ActivityDeal | Link::QuoteDeal | Link::OrderDeal => {
                Parent::Deal
            }
        }
    }

    /// Nulls this column on every live row that points at `id`.
    fn clear(self, conn: &mut PgConnection, id: Uuid, now: DateTime<Utc>) -> QueryResult<usize> {
        macro_rules! clear {
            ($table:ident, $column:ident) => {
                diesel::update(
                    $table::table
                        .filter($table::$column.eq(id))
                        .filter($table::deleted_at.is_null()),
                )
                .set(($table::$column.eq(None::<Uuid>), $table::updated_at.eq(now)))
                .execute(conn)
            };
        }

        match self {
            Link::ContactAccount => clear!(crm_contacts, account_id),
            Link::LeadAccount => clear!(crm_leads, account_id),
            Link::LeadContact => clear!(crm_leads, contact_id),
            Link::LeadConvertedDeal => clear!(crm_leads, converted_deal_id),
            Link::DealAccount => clear!(crm_deals, account_id),
            Link::DealContact => clear!(crm_deals, contact_id),
            Link::DealLead => clear!(crm_deals, lead_id),
            Link::ActivityAccount => clear!(crm_activities, account_id),
            Link::ActivityContact => clear!(crm_activities, contact_id),
            Link::ActivityLead => clear!(crm_activities, lead_id),
            Link::ActivityDeal => clear!(crm_activities, deal_id),
            Link::QuoteAccount => clear!(sales_quotes, account_id),
            Link::QuoteContact => clear!(sales_quotes, contact_id),
            Link::QuoteDeal => clear!(sales_quotes, deal_id),
            Link::OrderAccount => clear!(sales_orders, account_id),
            Link::OrderContact => clear!(sales_orders, contact_id),
            Link::OrderDeal => clear!(sales_orders, deal_id),
            Link::InvoiceAccount => clear!(sales_invoices, account_id),
            Link::InvoiceContact => clear!(sales_invoices, contact_id),
        }
    }
}

impl Parent {
    pub(crate) fn links(self) -> impl Iterator<Item = Link> {
        Link::ALL.into_iter().filter(move |link| link.parent() == self)
    }
}

/// Detaches every live record that points at `id`, returning how many rows
/// were changed. Must run in the transaction that soft-deletes the parent.
pub(crate) fn unlink_dependents(
    conn: &mut PgConnection,
    parent: Parent,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<usize, ApiError> {
    let mut changed = 0;
    for link in parent.links() {
        changed += link.clear(conn, id, now)?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_delete_detaches_contacts_and_deals() {
        let links: Vec<Link> = Parent::Account.links().collect();
        assert!(links.contains(&Link::ContactAccount));
        assert!(links.contains(&Link::DealAccount));
        assert!(links.contains(&Link::LeadAccount));
        assert!(links.contains(&Link::ActivityAccount));
        assert!(links.contains(&Link::InvoiceAccount));
        assert!(!links.contains(&Link::DealContact));
    }

    #[test]
    fn test_contact_delete_detaches_deals_and_activities() {
        let links: Vec<Link> = Parent::Contact.links().collect();
        assert_eq!(
            links,
            vec![
                Link::LeadContact,
                Link::DealContact,
                Link::ActivityContact,
                Link::QuoteContact,
                Link::OrderContact,
                Link::InvoiceContact,
            ]
        );
    }

    #[test]
    fn test_lead_and_deal_deletes_detach_their_dependents() {
        let lead: Vec<Link> = Parent::Lead.links().collect();
        assert_eq!(lead, vec![Link::DealLead, Link::ActivityLead]);

        let deal: Vec<Link> = Parent::Deal.links().collect();
        assert_eq!(
            deal,
            vec![
                Link::LeadConvertedDeal,
                Link::ActivityDeal,
                Link::QuoteDeal,
                Link::OrderDeal,
            ]
        );
    }

    #[test]
    fn test_every_link_belongs_to_exactly_one_parent() {
        let total: usize = [Parent::Account, Parent::Contact, Parent::Lead, Parent::Deal]
            .into_iter()
            .map(|parent| parent.links().count())
            .sum();
        assert_eq!(total, Link::ALL.len());
    }
}
