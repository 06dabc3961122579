table! {
    workspaces (id) {
        id -> Text,
        name -> Text,
        slug -> Text,
        created_at -> Timestamp,
    }
}

table! {
    users (id) {
        id -> Text,
        workspace_id -> Text,
        email -> Text,
        name -> Text,
        role -> Text,
        password_hash -> Text,
        password_salt -> Text,
        is_active -> Bool,
        created_at -> Timestamp,
        last_login_at -> Nullable<Timestamp>,
    }
}

table! {
    sessions (token) {
        token -> Text,
        user_id -> Text,
        created_at -> Timestamp,
        expires_at -> Timestamp,
    }
}

table! {
    organizations (id) {
        id -> Text,
        workspace_id -> Text,
        name -> Text,
        contact_email -> Nullable<Text>,
        notes -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        deleted_at -> Nullable<Timestamp>,
    }
}

table! {
    projects (id) {
        id -> Text,
        workspace_id -> Text,
        organization_id -> Nullable<Text>,
        name -> Text,
        description -> Nullable<Text>,
        status -> Text,
        created_by -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        deleted_at -> Nullable<Timestamp>,
    }
}

table! {
    project_stages (id) {
        id -> Text,
        project_id -> Text,
        name -> Text,
        position -> Integer,
        status -> Text,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
    }
}

table! {
    samples (id) {
        id -> Text,
        workspace_id -> Text,
        project_id -> Text,
        name -> Text,
        sample_type -> Text,
        external_id -> Nullable<Text>,
        status -> Text,
        collected_at -> Nullable<Timestamp>,
        notes -> Nullable<Text>,
        created_by -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        deleted_at -> Nullable<Timestamp>,
    }
}

table! {
    derived_samples (id) {
        id -> Text,
        workspace_id -> Text,
        sample_id -> Text,
        parent_id -> Nullable<Text>,
        name -> Text,
        derivation -> Text,
        depth -> Integer,
        created_by -> Text,
        created_at -> Timestamp,
        deleted_at -> Nullable<Timestamp>,
    }
}

table! {
    trials (id) {
        id -> Text,
        workspace_id -> Text,
        project_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        status -> Text,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        created_by -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        deleted_at -> Nullable<Timestamp>,
    }
}

table! {
    batches (id) {
        id -> Text,
        workspace_id -> Text,
        trial_id -> Nullable<Text>,
        name -> Text,
        status -> Text,
        notes -> Nullable<Text>,
        created_by -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        submitted_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        deleted_at -> Nullable<Timestamp>,
    }
}

table! {
    batch_items (id) {
        id -> Text,
        batch_id -> Text,
        derived_sample_id -> Text,
        position -> Integer,
        added_at -> Timestamp,
    }
}

table! {
    analysis_types (id) {
        id -> Text,
        workspace_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

table! {
    analyses (id) {
        id -> Text,
        workspace_id -> Text,
        batch_id -> Text,
        analysis_type_id -> Text,
        result -> Text,
        notes -> Nullable<Text>,
        is_authoritative -> Bool,
        supersedes_id -> Nullable<Text>,
        created_by -> Text,
        created_at -> Timestamp,
    }
}

table! {
    notifications (id) {
        id -> Text,
        workspace_id -> Text,
        user_id -> Text,
        kind -> Text,
        title -> Text,
        message -> Text,
        entity_type -> Nullable<Text>,
        entity_id -> Nullable<Text>,
        is_read -> Bool,
        created_at -> Timestamp,
        expires_at -> Nullable<Timestamp>,
    }
}

table! {
    notification_preferences (user_id) {
        user_id -> Text,
        analysis_updates -> Bool,
        batch_updates -> Bool,
        project_updates -> Bool,
        updated_at -> Timestamp,
    }
}

table! {
    audit_log (id) {
        id -> Text,
        workspace_id -> Text,
        user_id -> Nullable<Text>,
        action -> Text,
        entity_type -> Text,
        entity_id -> Text,
        details -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

joinable!(users -> workspaces (workspace_id));
joinable!(sessions -> users (user_id));
joinable!(projects -> organizations (organization_id));
joinable!(project_stages -> projects (project_id));
joinable!(samples -> projects (project_id));
joinable!(derived_samples -> samples (sample_id));
joinable!(trials -> projects (project_id));
joinable!(batches -> trials (trial_id));
joinable!(batch_items -> batches (batch_id));
joinable!(batch_items -> derived_samples (derived_sample_id));
joinable!(analyses -> batches (batch_id));
joinable!(analyses -> analysis_types (analysis_type_id));
joinable!(notifications -> users (user_id));

allow_tables_to_appear_in_same_query!(
    workspaces,
    users,
    sessions,
    organizations,
    projects,
    project_stages,
    samples,
    derived_samples,
    trials,
    batches,
    batch_items,
    analysis_types,
    analyses,
    notifications,
    notification_preferences,
    audit_log,
);
