use sqlx::Executor;
use thiserror::Error;

use crate::connection::DbPool;
use crate::knowledge::InMemoryKnowledgeStore;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Equipment rows the seed guarantees, keyed by id with their expected status.
const SEED_EQUIPMENT: &[(&str, &str)] = &[
    ("K-901", "active"),
    ("K-902", "active"),
    ("R-901", "active"),
    ("P-101", "active"),
    ("P-102", "active"),
    ("H-504", "inactive"),
];

const BIODIESEL_UNIT: i64 = 934;
const BIODIESEL_TANKS: i64 = 2;
const SEED_WORK_ORDERS: i64 = 5;

/// Deterministic CMMS dataset used by demos and end-to-end turns.
pub struct CmmsSeedDataset;

impl CmmsSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/cmms_seed.sql");

    /// Loads the dataset in one transaction. Rows that already exist are kept.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, FixtureError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let equipment: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM equipment")
            .fetch_one(pool)
            .await?;
        let work_orders: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM maintenance")
            .fetch_one(pool)
            .await?;

        tracing::info!(
            event_name = "fixtures.cmms_seeded",
            equipment,
            work_orders,
            "cmms seed dataset loaded"
        );
        Ok(SeedResult { equipment, work_orders })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, FixtureError> {
        let mut checks = Vec::new();

        for (equipid, status) in SEED_EQUIPMENT {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM equipment WHERE equipid = ?1 AND status = ?2)",
            )
            .bind(equipid)
            .bind(status)
            .fetch_one(pool)
            .await?;
            checks.push((*equipid, present == 1));
        }

        let tanks: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM equipment WHERE installlocationid = ?1 AND equiptype = 'Tank'",
        )
        .bind(BIODIESEL_UNIT)
        .fetch_one(pool)
        .await?;
        checks.push(("biodiesel-tanks", tanks == BIODIESEL_TANKS));

        let work_orders: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM maintenance")
            .fetch_one(pool)
            .await?;
        checks.push(("work-orders", work_orders >= SEED_WORK_ORDERS));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

/// Knowledge documents shipped with the repository, embedded for tests and demos.
pub struct KnowledgeFixtures;

impl KnowledgeFixtures {
    pub const DOCUMENTS: &[(&str, &str, &str)] = &[
        (
            "maintenance",
            "maintenance/biodiesel-unit-overview.md",
            include_str!("../../../config/knowledge/maintenance/biodiesel-unit-overview.md"),
        ),
        (
            "maintenance",
            "maintenance/p-102-decommissioning-notice.md",
            include_str!("../../../config/knowledge/maintenance/p-102-decommissioning-notice.md"),
        ),
        (
            "maintenance",
            "maintenance/safety-procedures.md",
            include_str!("../../../config/knowledge/maintenance/safety-procedures.md"),
        ),
        (
            "maintenance",
            "maintenance/shift-handover-2024-09-18.md",
            include_str!("../../../config/knowledge/maintenance/shift-handover-2024-09-18.md"),
        ),
        (
            "regulatory",
            "regulatory/fugitive-emissions-us.md",
            include_str!("../../../config/knowledge/regulatory/fugitive-emissions-us.md"),
        ),
        (
            "regulatory",
            "regulatory/offshore-decommissioning-brazil.md",
            include_str!("../../../config/knowledge/regulatory/offshore-decommissioning-brazil.md"),
        ),
        (
            "petrophysics",
            "petrophysics/avo-classes.md",
            include_str!("../../../config/knowledge/petrophysics/avo-classes.md"),
        ),
        (
            "petrophysics",
            "petrophysics/gassmann-fluid-substitution.md",
            include_str!("../../../config/knowledge/petrophysics/gassmann-fluid-substitution.md"),
        ),
    ];

    pub fn store() -> InMemoryKnowledgeStore {
        Self::DOCUMENTS.iter().fold(InMemoryKnowledgeStore::new(), |store, (collection, source, raw)| {
            store.with_document(collection, source, raw)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedResult {
    pub equipment: i64,
    pub work_orders: i64,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
