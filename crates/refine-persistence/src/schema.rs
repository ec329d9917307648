//! Esquema Diesel (escrito a mano a partir de `migrations/`). Reemplazable con `diesel print-schema`.

diesel::table! {
    flows (flow_id, version) {
        flow_id -> Uuid,
        version -> Int4,
        name -> Text,
        pipeline -> Text,
        status -> Text,
        nodes -> Jsonb,
        edges -> Jsonb,
        entry_node_id -> Nullable<Text>,
        effective_date -> Nullable<Timestamptz>,
        created_by -> Text,
        created_at -> Timestamptz,
        definition_hash -> Nullable<Text>,
    }
}

diesel::table! {
    batches (id) {
        id -> Uuid,
        batch_number -> Text,
        pipeline -> Text,
        flow_id -> Uuid,
        flow_version -> Int4,
        status -> Text,
        version -> Int8,
        document -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    batch_events (seq) {
        seq -> Int8,
        event_id -> Uuid,
        batch_id -> Uuid,
        event_seq -> Int8,
        event_type -> Text,
        payload -> Jsonb,
        ts -> Timestamptz,
    }
}

diesel::joinable!(batch_events -> batches (batch_id));

diesel::allow_tables_to_appear_in_same_query!(flows, batches, batch_events,);
