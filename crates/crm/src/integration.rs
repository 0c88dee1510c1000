//! Dashboard facade: cache-aware retrieval, optional post-processing and
//! export, on top of the [`Reconciler`].

use std::path::{Path, PathBuf};

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::cache::{generate_cache_key, DataRepository};
use crate::client::Fetcher;
use crate::error::CacheError;
use crate::export::ExportFormat;
use crate::outcome::{Outcome, OutcomeStatus};
use crate::process::process_data;
use crate::reconcile::Reconciler;
use crate::table::Table;

pub const DEFAULT_DAYS: i64 = 90;
pub const DEFAULT_OUTPUT_DIR: &str = "outputs";

const CACHE_PREFIX: &str = "deals";

/// Parameters of one dashboard load. Missing dates default to the last
/// `default_days` days ending today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub category_id: Option<i64>,
    pub use_cache: bool,
    pub force_refresh: bool,
    pub process: bool,
}

impl Default for DataRequest {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            category_id: None,
            use_cache: true,
            force_refresh: false,
            process: true,
        }
    }
}

pub struct Dashboard<F> {
    reconciler: Reconciler<F>,
    repository: DataRepository,
    default_days: i64,
    output_dir: PathBuf,
}

impl<F: Fetcher> Dashboard<F> {
    pub fn new(reconciler: Reconciler<F>, repository: DataRepository) -> Self {
        Self {
            reconciler,
            repository,
            default_days: DEFAULT_DAYS,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }

    pub fn with_default_days(mut self, days: i64) -> Self {
        self.default_days = days;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn reconciler(&self) -> &Reconciler<F> {
        &self.reconciler
    }

    pub fn repository(&self) -> &DataRepository {
        &self.repository
    }

    pub fn get_data(&self, request: &DataRequest) -> Outcome {
        self.get_data_at(request, Local::now().naive_local())
    }

    pub fn get_data_at(&self, request: &DataRequest, now: NaiveDateTime) -> Outcome {
        let today = now.date();
        let end = request.end.unwrap_or(today);
        let start = request
            .start
            .unwrap_or_else(|| today - Duration::days(self.default_days));
        let category_id = request
            .category_id
            .unwrap_or(self.reconciler.default_category_id());

        let key = generate_cache_key(
            CACHE_PREFIX,
            &[
                ("start_date", start.to_string()),
                ("end_date", end.to_string()),
                ("category_id", category_id.to_string()),
                ("processed", request.process.to_string()),
            ],
        );

        if request.use_cache && !request.force_refresh {
            if let Some(table) = self.repository.load(&key) {
                info!(%start, %end, "serving deals from cache");
                return Outcome::complete(table, Vec::new());
            }
        }

        info!(%start, %end, category_id, "loading fresh deal data");
        let mut outcome = self
            .reconciler
            .get_combined_data(start, end, Some(category_id));

        if request.process && !outcome.is_empty() {
            outcome.table = process_data(std::mem::take(&mut outcome.table), now);
        }

        if request.use_cache && outcome.status != OutcomeStatus::Complete {
            debug!(status = ?outcome.status, "not caching incomplete deal data");
        } else if request.use_cache {
            if let Err(e) = self.repository.save(&outcome.table, &key) {
                warn!(key = %key, error = %e, "could not cache deal data");
            }
        }
        outcome
    }

    /// Refetch the last `days` days, bypassing and then repopulating the cache.
    pub fn refresh_data(&self, days: i64) -> Outcome {
        let today = Local::now().date_naive();
        self.get_data(&DataRequest {
            start: Some(today - Duration::days(days)),
            end: Some(today),
            force_refresh: true,
            ..DataRequest::default()
        })
    }

    /// Export as CSV to `path`, or to `<output_dir>/deals_<YYYYMMDD>.csv`.
    /// Returns the written path, or `None` for an empty table.
    pub fn export_csv(
        &self,
        table: &Table,
        path: Option<&Path>,
    ) -> Result<Option<PathBuf>, CacheError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self
                .output_dir
                .join(format!("deals_{}.csv", Local::now().format("%Y%m%d"))),
        };
        let written = self.repository.export(table, &path, ExportFormat::Csv)?;
        Ok(written.then_some(path))
    }

    /// Snapshot the default window into the backup directory.
    pub fn backup_current_data(&self, description: Option<&str>) -> Result<Option<PathBuf>, CacheError> {
        let outcome = self.get_data(&DataRequest::default());
        let default_description = format!("deals_backup_{}", Local::now().format("%Y%m%d"));
        self.repository
            .backup(&outcome.table, Some(description.unwrap_or(&default_description)))
    }
}
