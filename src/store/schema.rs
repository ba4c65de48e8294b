//! DDL executed when the store is opened.
//!
//! All timestamps are RFC-3339 TEXT in UTC; JSON payloads are TEXT columns.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT '',
    system_prompt TEXT NOT NULL DEFAULT '',
    autonomy TEXT NOT NULL DEFAULT 'supervised',
    status TEXT NOT NULL DEFAULT 'active',
    ai_provider TEXT,
    ai_model TEXT,
    temperature REAL,
    max_tokens INTEGER,
    master_contact_id TEXT,
    master_contact_name TEXT,
    notification_channel TEXT NOT NULL DEFAULT 'email',
    notify_on TEXT NOT NULL DEFAULT '[]',
    escalation_timeout_minutes INTEGER NOT NULL DEFAULT 60,
    require_approval_for TEXT NOT NULL DEFAULT '[]',
    can_create_children INTEGER NOT NULL DEFAULT 0,
    max_children INTEGER NOT NULL DEFAULT 0,
    hierarchy_depth INTEGER NOT NULL DEFAULT 0,
    parent_agent_id TEXT,
    daily_budget_usd REAL NOT NULL DEFAULT 0,
    daily_budget_used REAL NOT NULL DEFAULT 0,
    interaction_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agents_user ON agents (user_id);
CREATE INDEX IF NOT EXISTS idx_agents_parent ON agents (parent_agent_id);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    agent_id TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    priority TEXT NOT NULL DEFAULT 'normal',
    task_type TEXT NOT NULL DEFAULT 'standard',
    due_at TEXT,
    assignee_id TEXT,
    parent_task_id TEXT,
    ai_summary TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_agent ON tasks (agent_id);
CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks (parent_task_id);

CREATE TABLE IF NOT EXISTS schedules (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    schedule_type TEXT NOT NULL,
    cron_expression TEXT,
    interval_minutes INTEGER,
    action_type TEXT NOT NULL,
    action_config TEXT NOT NULL DEFAULT '{}',
    custom_prompt TEXT,
    next_run_at TEXT,
    last_run_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (is_active, next_run_at);

CREATE TABLE IF NOT EXISTS job_history (
    id TEXT PRIMARY KEY NOT NULL,
    schedule_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    scheduled_at TEXT,
    started_at TEXT,
    completed_at TEXT,
    duration_ms INTEGER,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    input_data TEXT,
    output_data TEXT,
    result_summary TEXT,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    provider TEXT,
    model TEXT
);
CREATE INDEX IF NOT EXISTS idx_job_history_schedule ON job_history (schedule_id);
CREATE INDEX IF NOT EXISTS idx_job_history_status ON job_history (status);

CREATE TABLE IF NOT EXISTS agent_messages (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    message_type TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    reply_to TEXT,
    thread_id TEXT,
    priority TEXT NOT NULL DEFAULT 'normal',
    status TEXT NOT NULL DEFAULT 'pending',
    acknowledged_at TEXT,
    responded_at TEXT,
    task_id TEXT,
    deadline_at TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agent_messages_receiver ON agent_messages (receiver_id, status);
CREATE INDEX IF NOT EXISTS idx_agent_messages_thread ON agent_messages (thread_id);

CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    participant_key TEXT NOT NULL,
    participants TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    thread_type TEXT NOT NULL DEFAULT 'direct',
    task_id TEXT,
    context TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_message_at TEXT,
    message_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_threads_key ON threads (participant_key);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    initiator_id TEXT NOT NULL,
    participant_ids TEXT NOT NULL,
    conversation_type TEXT NOT NULL,
    topic TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    metadata TEXT NOT NULL DEFAULT '{}',
    result TEXT,
    deadline TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_status ON conversations (status);

CREATE TABLE IF NOT EXISTS conversation_messages (
    id TEXT PRIMARY KEY NOT NULL,
    conversation_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    message_type TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversation_messages_conv ON conversation_messages (conversation_id);

CREATE TABLE IF NOT EXISTS approval_queue (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    action_title TEXT NOT NULL DEFAULT '',
    action_description TEXT NOT NULL DEFAULT '',
    action_payload TEXT NOT NULL DEFAULT '{}',
    triggered_by TEXT,
    trigger_context TEXT,
    confidence_score REAL,
    reasoning TEXT,
    master_contact_id TEXT NOT NULL,
    notification_channel TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    resolved_by TEXT,
    resolved_at TEXT,
    resolution_notes TEXT,
    modified_payload TEXT,
    priority TEXT NOT NULL DEFAULT 'normal',
    expires_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_approval_queue_pending ON approval_queue (status, created_at);

CREATE TABLE IF NOT EXISTS contacts (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    platform TEXT,
    is_team_member INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contact_scopes (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    platform_account_id TEXT,
    scope_type TEXT NOT NULL DEFAULT 'team_only',
    allow_team_members INTEGER NOT NULL DEFAULT 1,
    allowed_contact_ids TEXT NOT NULL DEFAULT '[]',
    allowed_tags TEXT NOT NULL DEFAULT '[]',
    notify_on_out_of_scope INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_contact_scopes_agent ON contact_scopes (agent_id);

CREATE TABLE IF NOT EXISTS master_notifications (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    notification_type TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}',
    channel TEXT NOT NULL,
    delivery_status TEXT NOT NULL DEFAULT 'pending',
    delivery_attempts INTEGER NOT NULL DEFAULT 0,
    sent_at TEXT,
    delivered_at TEXT,
    read_at TEXT,
    reference_type TEXT,
    reference_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_master_notifications_agent ON master_notifications (agent_id);

CREATE TABLE IF NOT EXISTS usage_log (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    request_type TEXT NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    task_id TEXT,
    conversation_id TEXT,
    source TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_log_agent_day ON usage_log (agent_id, created_at);

CREATE TABLE IF NOT EXISTS hierarchy_log (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_skills (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    category TEXT NOT NULL,
    current_level INTEGER NOT NULL DEFAULT 1,
    xp INTEGER NOT NULL DEFAULT 0,
    thresholds TEXT NOT NULL DEFAULT '[100,300,600,1000]',
    last_used_at TEXT,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_agent_skills_cat ON agent_skills (agent_id, category);

CREATE TABLE IF NOT EXISTS skill_history (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    category TEXT NOT NULL,
    event_type TEXT NOT NULL,
    from_level INTEGER,
    to_level INTEGER,
    xp_delta INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoints (
    agent_id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    trigger_kind TEXT NOT NULL,
    trigger_context TEXT NOT NULL DEFAULT '{}',
    iteration INTEGER NOT NULL DEFAULT 0,
    action_records TEXT NOT NULL DEFAULT '[]',
    tokens_used INTEGER NOT NULL DEFAULT 0,
    tier TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_log (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    details TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_activity_agent ON activity_log (agent_id);

CREATE TABLE IF NOT EXISTS tool_executions (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    tool TEXT NOT NULL,
    params TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL,
    result_summary TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tool_executions_agent ON tool_executions (agent_id);
"#;
