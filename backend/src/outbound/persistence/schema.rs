//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `backend/migrations` exactly. Regenerate with
//! `diesel print-schema` after changing a migration.

diesel::table! {
    /// Integration reference records.
    integrations (id) {
        id -> Text,
        /// Vendor display name, e.g. `SmartCar`.
        vendor -> Text,
        /// `API` or `Hardware`.
        integration_type -> Text,
        /// `OEM` or `Addon`.
        style -> Text,
        /// Template defaults as camelCase JSON.
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Make/model/year definitions devices are registered against.
    device_definitions (id) {
        id -> Text,
        make -> Text,
        model -> Text,
        year -> Int4,
        powertrain -> Nullable<Text>,
        template_id -> Nullable<Int8>,
        make_template_id -> Nullable<Int8>,
        /// Style id to template id.
        style_template_ids -> Jsonb,
    }
}

diesel::table! {
    /// User-owned vehicles.
    user_devices (id) {
        id -> Text,
        user_id -> Text,
        device_definition_id -> Text,
        vin -> Nullable<Text>,
        vin_confirmed -> Bool,
        name -> Nullable<Text>,
        device_style_id -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Minted vehicle tokens. `user_device_id` is cleared when the vehicle
    /// is deleted.
    vehicle_nfts (token_id) {
        token_id -> Int8,
        user_device_id -> Nullable<Text>,
    }
}

diesel::table! {
    /// Integration links, one per (device, integration).
    user_device_api_integrations (user_device_id, integration_id) {
        user_device_id -> Text,
        integration_id -> Text,
        external_id -> Nullable<Text>,
        status -> Text,
        task_id -> Nullable<Text>,
        access_token -> Nullable<Text>,
        refresh_token -> Nullable<Text>,
        access_expires_at -> Nullable<Timestamptz>,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Latest telemetry snapshot per (device, integration).
    user_device_data (user_device_id, integration_id) {
        user_device_id -> Text,
        integration_id -> Text,
        data -> Nullable<Jsonb>,
        error_data -> Nullable<Jsonb>,
        last_odometer_event_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Append-only bus log. `id` is the record offset.
    bus_messages (id) {
        id -> Int8,
        topic -> Text,
        message_key -> Nullable<Text>,
        /// `NULL` marks a tombstone.
        payload -> Nullable<Jsonb>,
        published_at -> Timestamptz,
    }
}

diesel::table! {
    /// Next offset to deliver per topic and consumer group.
    bus_consumer_offsets (topic, consumer_group) {
        topic -> Text,
        consumer_group -> Text,
        next_offset -> Int8,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(user_devices -> device_definitions (device_definition_id));
diesel::joinable!(user_device_api_integrations -> integrations (integration_id));

diesel::allow_tables_to_appear_in_same_query!(
    integrations,
    device_definitions,
    user_devices,
    vehicle_nfts,
    user_device_api_integrations,
    user_device_data,
    bus_messages,
    bus_consumer_offsets,
);
