pub mod core;
pub use self::core::*;

pub mod people;
pub use self::people::*;

pub mod sales;
pub use self::sales::*;

diesel::allow_tables_to_appear_in_same_query!(
    organizations,
    organization_members,
    users,
    rbac_roles,
    rbac_permissions,
    rbac_role_permissions,
    rbac_user_roles,
    user_preferences,
    system_settings,
    crm_territories,
    crm_accounts,
    crm_contacts,
    crm_pipeline_stages,
    crm_leads,
    crm_deals,
    crm_activities,
    products,
    sales_quotes,
    sales_orders,
    sales_invoices,
    sales_line_items,
    sales_payments,
);
