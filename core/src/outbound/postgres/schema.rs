//! Diesel table definitions, mirroring `migrations/`.

diesel::table! {
    campaigns (campaign_id) {
        campaign_id -> Int8,
        display_name -> Varchar,
    }
}

diesel::table! {
    scenes (scene_id) {
        scene_id -> Int8,
        campaign_id -> Int8,
        channel_id -> Varchar,
    }
}

diesel::table! {
    events (event_id) {
        event_id -> Int8,
        campaign_id -> Int8,
        scene_id -> Nullable<Int8>,
        replay_ordinal -> Int8,
        event_type -> Varchar,
        event_schema_version -> Int4,
        world_time -> Int8,
        wall_time_utc -> Timestamptz,
        prev_event_hash -> Bytea,
        payload_hash -> Bytea,
        idempotency_key -> Bytea,
        actor_id -> Nullable<Varchar>,
        plan_id -> Nullable<Varchar>,
        execution_request_id -> Nullable<Varchar>,
        approved_by -> Nullable<Varchar>,
        payload -> Jsonb,
        migrator_applied_from -> Nullable<Int4>,
    }
}

diesel::table! {
    import_log (run_id, sequence) {
        run_id -> Uuid,
        sequence -> Int4,
        phase -> Varchar,
        stable_id -> Nullable<Varchar>,
        file_hash -> Nullable<Bytea>,
        action -> Varchar,
        metadata -> Nullable<Jsonb>,
    }
}

diesel::joinable!(scenes -> campaigns (campaign_id));
diesel::joinable!(events -> campaigns (campaign_id));
diesel::allow_tables_to_appear_in_same_query!(campaigns, scenes, events, import_log);
