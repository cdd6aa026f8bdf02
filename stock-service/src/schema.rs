diesel::table! {
    stock_locations (id) {
        id -> Uuid,
        name -> Varchar,
        location_type -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    product_variations (id) {
        id -> Uuid,
        sku -> Varchar,
        remote_product_id -> Int8,
        remote_variant_id -> Int8,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    stock_transactions (id) {
        id -> Int8,
        entity_id -> Uuid,
        location_id -> Uuid,
        quantity -> Int4,
        unit_price -> Nullable<Numeric>,
        currency_code -> Nullable<Varchar>,
        transaction_type -> Varchar,
        related_oid -> Nullable<Uuid>,
        related_tid -> Nullable<Int8>,
        transaction_time -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    stock_locations,
    product_variations,
    stock_transactions,
);
