use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    CatalogDefinition, EventId, InstanceId, InstanceStatus, InstanceStepStatus,
    InstanceStepWithTopic, NewInstanceStep, NewProcessLog, ProcessLog, Result, Step, StepId,
    StepOutcome, StepStatus, StoreError, Workflow, WorkflowId, WorkflowInstance,
    WorkflowInstanceStep, store::WorkflowStore,
};

const INSTANCE_STEP_COLUMNS: &str = "wis.id, wis.event_id, wis.workflow_instance_id, wis.step_id, \
     wis.status, wis.event_message, wis.status_code, wis.response, wis.started_at, wis.completed_at";

/// PostgreSQL-backed workflow store implementation.
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Creates a new PostgreSQL workflow store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_workflow(row: PgRow) -> Result<Workflow> {
        Ok(Workflow {
            id: WorkflowId::new(row.try_get("id")?),
            workflow_type: row.try_get("type")?,
            description: row.try_get("description")?,
            initiating_states: row.try_get("initiating_states")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_step(row: PgRow) -> Result<Step> {
        Ok(Step {
            step_id: StepId::new(row.try_get("step_id")?),
            state: row.try_get("state")?,
            service: row.try_get("service")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            topic: row.try_get("topic")?,
        })
    }

    fn row_to_instance(row: PgRow) -> Result<WorkflowInstance> {
        Ok(WorkflowInstance {
            id: InstanceId::from(row.try_get::<String, _>("id")?),
            workflow_id: WorkflowId::new(row.try_get("workflow_id")?),
            status: parse_instance_status(&row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_instance_step(row: &PgRow) -> Result<WorkflowInstanceStep> {
        Ok(WorkflowInstanceStep {
            id: row.try_get("id")?,
            event_id: EventId::from(row.try_get::<String, _>("event_id")?),
            workflow_instance_id: InstanceId::from(
                row.try_get::<String, _>("workflow_instance_id")?,
            ),
            step_id: StepId::new(row.try_get("step_id")?),
            status: parse_step_status(row, "status")?,
            event_message: row.try_get("event_message")?,
            status_code: row.try_get("status_code")?,
            response: row.try_get("response")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn row_to_process_log(row: PgRow) -> Result<ProcessLog> {
        Ok(ProcessLog {
            id: row.try_get("id")?,
            event_id: EventId::from(row.try_get::<String, _>("event_id")?),
            workflow_instance_id: InstanceId::from(
                row.try_get::<String, _>("workflow_instance_id")?,
            ),
            state: row.try_get("state")?,
            status: row.try_get("status")?,
            status_code: row.try_get("status_code")?,
            event_message: row.try_get("event_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn parse_instance_status(row: &PgRow, column: &str) -> Result<InstanceStatus> {
    row.try_get::<String, _>(column)?
        .parse()
        .map_err(|e: common::ParseStatusError| StoreError::Corrupt(e.to_string()))
}

fn parse_step_status(row: &PgRow, column: &str) -> Result<StepStatus> {
    row.try_get::<String, _>(column)?
        .parse()
        .map_err(|e: common::ParseStatusError| StoreError::Corrupt(e.to_string()))
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn seed_catalog(&self, catalog: &CatalogDefinition) -> Result<()> {
        catalog.validate()?;

        let mut tx = self.pool.begin().await?;

        for step in &catalog.steps {
            let step_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO steps (name, service, description, topic)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (name) DO UPDATE SET
                    service = EXCLUDED.service,
                    description = EXCLUDED.description,
                    topic = EXCLUDED.topic,
                    updated_at = NOW()
                RETURNING id
                "#,
            )
            .bind(&step.name)
            .bind(&step.service)
            .bind(&step.description)
            .bind(&step.topic)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM payload_keys WHERE step_id = $1")
                .bind(step_id)
                .execute(&mut *tx)
                .await?;

            for (position, key) in step.payload_keys.iter().enumerate() {
                sqlx::query("INSERT INTO payload_keys (step_id, position, key) VALUES ($1, $2, $3)")
                    .bind(step_id)
                    .bind(position as i32)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for workflow in &catalog.workflows {
            let workflow_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO workflows (type, description, initiating_states)
                VALUES ($1, $2, $3)
                ON CONFLICT (type) DO UPDATE SET
                    description = EXCLUDED.description,
                    initiating_states = EXCLUDED.initiating_states,
                    updated_at = NOW()
                RETURNING id
                "#,
            )
            .bind(&workflow.workflow_type)
            .bind(&workflow.description)
            .bind(&workflow.initiating_states)
            .fetch_one(&mut *tx)
            .await?;

            for transition in &workflow.transitions {
                for name in &transition.steps {
                    sqlx::query(
                        r#"
                        INSERT INTO state_actions (workflow_id, state, step_id)
                        SELECT $1, $2, id FROM steps WHERE name = $3
                        ON CONFLICT ON CONSTRAINT unique_state_action DO NOTHING
                        "#,
                    )
                    .bind(workflow_id)
                    .bind(&transition.state)
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        tracing::debug!(
            workflows = catalog.workflows.len(),
            steps = catalog.steps.len(),
            "catalog seeded"
        );
        Ok(())
    }

    async fn find_workflow_by_type(&self, workflow_type: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query(
            r#"
            SELECT id, type, description, initiating_states, created_at, updated_at
            FROM workflows
            WHERE type = $1
            "#,
        )
        .bind(workflow_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_workflow).transpose()
    }

    async fn find_steps_by_type_and_state(
        &self,
        workflow_type: &str,
        state: &str,
    ) -> Result<Vec<Step>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id AS step_id, sa.state, s.service, s.name, s.description, s.topic
            FROM state_actions sa
            JOIN workflows w ON w.id = sa.workflow_id
            JOIN steps s ON s.id = sa.step_id
            WHERE w.type = $1 AND sa.state = $2
            ORDER BY sa.id ASC
            "#,
        )
        .bind(workflow_type)
        .bind(state)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_step).collect()
    }

    async fn find_steps_by_type(&self, workflow_type: &str) -> Result<Vec<Step>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id AS step_id, sa.state, s.service, s.name, s.description, s.topic
            FROM state_actions sa
            JOIN workflows w ON w.id = sa.workflow_id
            JOIN steps s ON s.id = sa.step_id
            WHERE w.type = $1
            ORDER BY sa.id ASC
            "#,
        )
        .bind(workflow_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_step).collect()
    }

    async fn find_payload_keys_by_step_id(&self, step_id: StepId) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar(
            "SELECT key FROM payload_keys WHERE step_id = $1 ORDER BY position ASC",
        )
        .bind(step_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn create_workflow_instance(
        &self,
        id: &InstanceId,
        workflow_id: WorkflowId,
        status: InstanceStatus,
    ) -> Result<WorkflowInstance> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_instances (id, workflow_id, status)
            VALUES ($1, $2, $3)
            RETURNING id, workflow_id, status, created_at, updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(workflow_id.as_i64())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return StoreError::already_exists("workflow instance", id);
                }
                if db_err.is_foreign_key_violation() {
                    return StoreError::not_found("workflow", workflow_id);
                }
            }
            StoreError::Database(e)
        })?;

        Self::row_to_instance(row)
    }

    async fn find_workflow_instance_by_id(
        &self,
        id: &InstanceId,
    ) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, status, created_at, updated_at
            FROM workflow_instances
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_instance).transpose()
    }

    async fn update_workflow_instance(
        &self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE workflow_instances SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("workflow instance", id));
        }
        Ok(())
    }

    async fn create_workflow_instance_step(
        &self,
        step: NewInstanceStep,
    ) -> Result<WorkflowInstanceStep> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_instance_steps AS wis
                (event_id, workflow_instance_id, step_id, status, event_message, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING wis.id, wis.event_id, wis.workflow_instance_id, wis.step_id, wis.status,
                wis.event_message, wis.status_code, wis.response, wis.started_at, wis.completed_at
            "#,
        )
        .bind(step.event_id.as_str())
        .bind(step.workflow_instance_id.as_str())
        .bind(step.step_id.as_i64())
        .bind(step.status.as_str())
        .bind(&step.event_message)
        .bind(step.started_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return StoreError::already_exists("workflow instance step", &step.event_id);
                }
                if db_err.is_foreign_key_violation() {
                    return StoreError::not_found(
                        "workflow instance",
                        &step.workflow_instance_id,
                    );
                }
            }
            StoreError::Database(e)
        })?;

        Self::row_to_instance_step(&row)
    }

    async fn find_workflow_instance_step_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<WorkflowInstanceStep>> {
        let sql = format!(
            "SELECT {INSTANCE_STEP_COLUMNS} FROM workflow_instance_steps wis WHERE wis.event_id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_instance_step).transpose()
    }

    async fn update_workflow_instance_step(&self, outcome: StepOutcome) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_instance_steps
            SET status = $2, status_code = $3, response = $4, event_message = $5, completed_at = $6
            WHERE event_id = $1
            "#,
        )
        .bind(outcome.event_id.as_str())
        .bind(outcome.status.as_str())
        .bind(outcome.status_code)
        .bind(&outcome.response)
        .bind(&outcome.event_message)
        .bind(outcome.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(
                "workflow instance step",
                &outcome.event_id,
            ));
        }
        Ok(())
    }

    async fn restart_workflow_instance_step(
        &self,
        event_id: &EventId,
        event_message: String,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_instance_steps
            SET status = $2, event_message = $3, started_at = $4, completed_at = NULL
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_str())
        .bind(StepStatus::InProgress.as_str())
        .bind(&event_message)
        .bind(started_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("workflow instance step", event_id));
        }
        Ok(())
    }

    async fn find_workflow_instance_step_by_event_id_and_instance_id(
        &self,
        event_id: &EventId,
        instance_id: &InstanceId,
    ) -> Result<Option<InstanceStepWithTopic>> {
        let sql = format!(
            r#"
            SELECT {INSTANCE_STEP_COLUMNS}, s.topic
            FROM workflow_instance_steps wis
            JOIN steps s ON s.id = wis.step_id
            WHERE wis.event_id = $1 AND wis.workflow_instance_id = $2
            "#
        );
        let row = sqlx::query(&sql)
            .bind(event_id.as_str())
            .bind(instance_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(InstanceStepWithTopic {
                step: Self::row_to_instance_step(&row)?,
                topic: row.try_get("topic")?,
            })),
            None => Ok(None),
        }
    }

    async fn find_workflow_instance_steps_by_type_and_instance_id(
        &self,
        workflow_type: &str,
        instance_id: &InstanceId,
    ) -> Result<Vec<InstanceStepStatus>> {
        let rows = sqlx::query(
            r#"
            SELECT w.id AS workflow_id, w.type, wi.id AS instance_id, wi.status AS instance_status,
                wis.status AS step_status, wis.step_id
            FROM workflow_instance_steps wis
            JOIN workflow_instances wi ON wi.id = wis.workflow_instance_id
            JOIN workflows w ON w.id = wi.workflow_id
            WHERE w.type = $1 AND wi.id = $2
            ORDER BY wis.id ASC
            "#,
        )
        .bind(workflow_type)
        .bind(instance_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<InstanceStepStatus> {
                Ok(InstanceStepStatus {
                    workflow_id: WorkflowId::new(row.try_get("workflow_id")?),
                    workflow_type: row.try_get("type")?,
                    instance_id: InstanceId::from(row.try_get::<String, _>("instance_id")?),
                    instance_status: parse_instance_status(row, "instance_status")?,
                    step_status: parse_step_status(row, "step_status")?,
                    step_id: StepId::new(row.try_get("step_id")?),
                })
            })
            .collect()
    }

    async fn find_workflow_instance_steps(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<WorkflowInstanceStep>> {
        let sql = format!(
            r#"
            SELECT {INSTANCE_STEP_COLUMNS}
            FROM workflow_instance_steps wis
            WHERE wis.workflow_instance_id = $1
            ORDER BY wis.id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(instance_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_instance_step).collect()
    }

    async fn find_stale_instance_steps(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<WorkflowInstanceStep>> {
        let sql = format!(
            r#"
            SELECT {INSTANCE_STEP_COLUMNS}
            FROM workflow_instance_steps wis
            WHERE wis.status = $1 AND wis.started_at < $2
            ORDER BY wis.started_at ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(StepStatus::InProgress.as_str())
            .bind(started_before)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_instance_step).collect()
    }

    async fn create_process_log(&self, log: NewProcessLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO process_logs
                (event_id, workflow_instance_id, state, status, status_code, event_message)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(log.event_id.as_str())
        .bind(log.workflow_instance_id.as_str())
        .bind(&log.state)
        .bind(&log.status)
        .bind(log.status_code)
        .bind(&log.event_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_process_logs(&self, instance_id: &InstanceId) -> Result<Vec<ProcessLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, workflow_instance_id, state, status, status_code, event_message,
                created_at
            FROM process_logs
            WHERE workflow_instance_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(instance_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_process_log).collect()
    }
}
