diesel::table! {
    products (id) {
        id -> Uuid,
        org_id -> Uuid,
        sku -> Nullable<Varchar>,
        name -> Varchar,
        description -> Nullable<Text>,
        category -> Nullable<Varchar>,
        product_type -> Varchar,
        unit_price -> Numeric,
        cost -> Nullable<Numeric>,
        currency -> Varchar,
        tax_rate -> Numeric,
        unit -> Varchar,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    sales_quotes (id) {
        id -> Uuid,
        org_id -> Uuid,
        quote_number -> Varchar,
        account_id -> Nullable<Uuid>,
        contact_id -> Nullable<Uuid>,
        deal_id -> Nullable<Uuid>,
        customer_name -> Varchar,
        status -> Varchar,
        issue_date -> Date,
        valid_until -> Date,
        currency -> Varchar,
        subtotal -> Numeric,
        discount_percent -> Numeric,
        discount_amount -> Numeric,
        tax_rate -> Numeric,
        tax_amount -> Numeric,
        total -> Numeric,
        notes -> Nullable<Text>,
        terms -> Nullable<Text>,
        owner_id -> Nullable<Uuid>,
        sent_at -> Nullable<Timestamptz>,
        accepted_at -> Nullable<Timestamptz>,
        rejected_at -> Nullable<Timestamptz>,
        converted_order_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    sales_orders (id) {
        id -> Uuid,
        org_id -> Uuid,
        order_number -> Varchar,
        quote_id -> Nullable<Uuid>,
        account_id -> Nullable<Uuid>,
        contact_id -> Nullable<Uuid>,
        deal_id -> Nullable<Uuid>,
        customer_name -> Varchar,
        status -> Varchar,
        order_date -> Date,
        expected_delivery_date -> Nullable<Date>,
        currency -> Varchar,
        subtotal -> Numeric,
        discount_percent -> Numeric,
        discount_amount -> Numeric,
        tax_rate -> Numeric,
        tax_amount -> Numeric,
        total -> Numeric,
        notes -> Nullable<Text>,
        owner_id -> Nullable<Uuid>,
        confirmed_at -> Nullable<Timestamptz>,
        fulfilled_at -> Nullable<Timestamptz>,
        cancelled_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    sales_invoices (id) {
        id -> Uuid,
        org_id -> Uuid,
        invoice_number -> Varchar,
        order_id -> Nullable<Uuid>,
        account_id -> Nullable<Uuid>,
        contact_id -> Nullable<Uuid>,
        customer_name -> Varchar,
        customer_email -> Nullable<Varchar>,
        status -> Varchar,
        issue_date -> Date,
        due_date -> Date,
        currency -> Varchar,
        subtotal -> Numeric,
        discount_percent -> Numeric,
        discount_amount -> Numeric,
        tax_rate -> Numeric,
        tax_amount -> Numeric,
        total -> Numeric,
        amount_paid -> Numeric,
        balance_due -> Numeric,
        notes -> Nullable<Text>,
        terms -> Nullable<Text>,
        owner_id -> Nullable<Uuid>,
        sent_at -> Nullable<Timestamptz>,
        paid_at -> Nullable<Timestamptz>,
        voided_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    sales_line_items (id) {
        id -> Uuid,
        document_type -> Varchar,
        document_id -> Uuid,
        product_id -> Nullable<Uuid>,
        description -> Varchar,
        quantity -> Numeric,
        unit_price -> Numeric,
        discount_percent -> Numeric,
        amount -> Numeric,
        sort_order -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sales_payments (id) {
        id -> Uuid,
        org_id -> Uuid,
        payment_number -> Varchar,
        invoice_id -> Uuid,
        amount -> Numeric,
        currency -> Varchar,
        payment_method -> Varchar,
        reference -> Nullable<Varchar>,
        status -> Varchar,
        paid_at -> Timestamptz,
        notes -> Nullable<Text>,
        recorded_by -> Nullable<Uuid>,
        refunded_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(sales_payments -> sales_invoices (invoice_id));
diesel::joinable!(sales_line_items -> products (product_id));
