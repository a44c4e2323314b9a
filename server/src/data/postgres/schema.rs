//! PostgreSQL schema definition
//!
//! Tables owned by this service live in the `service_ops` schema. The
//! upstream source table `integration.intake_messages` is owned by the
//! integration layer; it is created here only so local development and
//! tests have something to poll against (CREATE IF NOT EXISTS keeps
//! production deployments untouched).

pub const SCHEMA_VERSION: i32 = 1;

pub const SCHEMA: &str = r#"
CREATE SCHEMA IF NOT EXISTS integration;
CREATE SCHEMA IF NOT EXISTS service_ops;

-- Upstream source table (integration layer owns writes)
CREATE TABLE IF NOT EXISTS integration.intake_messages (
    message_id              BIGINT PRIMARY KEY,
    decision_tracking_id    UUID NOT NULL,
    payload                 JSONB NOT NULL,
    channel_type_id         SMALLINT,
    message_type_id         SMALLINT,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    is_deleted              BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS ix_intake_messages_poll
    ON integration.intake_messages (created_at, message_id)
    WHERE is_deleted = FALSE;

-- Local processing state, one row per upstream message
CREATE TABLE IF NOT EXISTS service_ops.intake_inbox (
    inbox_id                BIGSERIAL PRIMARY KEY,
    message_id              BIGINT NOT NULL,
    decision_tracking_id    UUID NOT NULL,
    message_type            TEXT NOT NULL,
    source_created_at       TIMESTAMPTZ NOT NULL,
    status                  TEXT NOT NULL DEFAULT 'NEW',
    attempt_count           INTEGER NOT NULL DEFAULT 0,
    locked_by               TEXT,
    locked_at               TIMESTAMPTZ,
    next_attempt_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_error              TEXT,
    channel_type_id         SMALLINT,
    message_type_id         SMALLINT,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uq_intake_inbox_message_id UNIQUE (message_id)
);

CREATE INDEX IF NOT EXISTS ix_intake_inbox_claim
    ON service_ops.intake_inbox (status, next_attempt_at, locked_at);
CREATE INDEX IF NOT EXISTS ix_intake_inbox_order
    ON service_ops.intake_inbox (source_created_at, message_id);

-- Polling high-water mark (single row, id = 1)
CREATE TABLE IF NOT EXISTS service_ops.intake_poll_watermark (
    id                      INTEGER PRIMARY KEY,
    last_created_at         TIMESTAMPTZ NOT NULL,
    last_message_id         BIGINT NOT NULL,
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Case aggregate, one per decision_tracking_id
CREATE TABLE IF NOT EXISTS service_ops.cases (
    case_id                 BIGSERIAL PRIMARY KEY,
    external_id             TEXT NOT NULL,
    decision_tracking_id    UUID NOT NULL,
    channel_specific_id     TEXT,
    beneficiary_name        TEXT NOT NULL DEFAULT 'TBD',
    beneficiary_mbi         TEXT NOT NULL DEFAULT 'TBD',
    provider_name           TEXT NOT NULL DEFAULT 'TBD',
    provider_npi            TEXT NOT NULL DEFAULT 'TBD',
    service_type            TEXT NOT NULL DEFAULT 'Prior Authorization',
    received_date           TIMESTAMPTZ NOT NULL,
    due_date                TIMESTAMPTZ NOT NULL,
    submission_type         TEXT,
    channel_type_id         SMALLINT,
    detailed_status         TEXT NOT NULL DEFAULT 'Pending - New',
    tracking_number         TEXT,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uq_cases_decision_tracking_id UNIQUE (decision_tracking_id),
    CONSTRAINT uq_cases_external_id UNIQUE (external_id)
);

-- Consolidated document artifact, exactly one per case
CREATE TABLE IF NOT EXISTS service_ops.case_documents (
    document_id             BIGSERIAL PRIMARY KEY,
    case_id                 BIGINT NOT NULL REFERENCES service_ops.cases (case_id),
    external_id             TEXT NOT NULL,
    file_name               TEXT NOT NULL,
    consolidated_blob_path  TEXT,
    processing_path         TEXT,
    file_size_bytes         BIGINT,
    page_count              INTEGER NOT NULL DEFAULT 0,
    pages_metadata          JSONB,
    ocr_metadata            JSONB,
    extracted_fields        JSONB,
    updated_extracted_fields JSONB,
    split_status            TEXT NOT NULL DEFAULT 'NOT_STARTED',
    ocr_status              TEXT NOT NULL DEFAULT 'NOT_STARTED',
    coversheet_page_number  INTEGER,
    part_type               TEXT,
    needs_manual_review     BOOLEAN NOT NULL DEFAULT FALSE,
    uploaded_at             TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uq_case_documents_case_id UNIQUE (case_id),
    CONSTRAINT uq_case_documents_external_id UNIQUE (external_id)
);

CREATE TABLE IF NOT EXISTS service_ops.schema_version (
    id                      INTEGER PRIMARY KEY,
    version                 INTEGER NOT NULL,
    applied_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

pub const DEFAULT_DATA: &str = r#"
INSERT INTO service_ops.intake_poll_watermark (id, last_created_at, last_message_id, updated_at)
VALUES (1, '1970-01-01 00:00:00+00', 0, NOW())
ON CONFLICT (id) DO NOTHING;
"#;
