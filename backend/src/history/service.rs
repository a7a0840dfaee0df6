use uuid::Uuid;

use crate::db::repository::{Repository, RepositoryError};
use crate::storage::s3_service::{S3Service, S3ServiceError};

use super::models::{Analysis, Pagination};

/// Hard ceiling on page size, matching the API contract.
pub const MAX_PAGE_SIZE: usize = 50;
pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Clone)]
pub struct HistoryService {
    db_repo: Repository,
    s3_service: S3Service,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Storage error: {0}")]
    Storage(#[from] S3ServiceError),
    #[error("Analysis not found")]
    NotFound,
}

impl HistoryService {
    pub fn new(db_repo: Repository, s3_service: S3Service) -> Self {
        Self { db_repo, s3_service }
    }

    /// Append-only write of one analysis record.
    pub async fn record(&self, analysis: &Analysis) -> Result<Uuid, HistoryError> {
        self.db_repo.create_analysis(analysis).await?;
        Ok(analysis.id)
    }

    /// The caller's history, newest first, with clamped pagination.
    pub async fn list(
        &self,
        user_id: Uuid,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<Analysis>, Pagination), HistoryError> {
        let mut analyses = self.db_repo.list_analyses(user_id).await?;
        analyses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(analyses, page, per_page))
    }

    /// Owner-scoped fetch; another user's record id reads as not found.
    pub async fn get(&self, user_id: Uuid, analysis_id: Uuid) -> Result<Analysis, HistoryError> {
        self.db_repo
            .get_analysis(user_id, analysis_id)
            .await?
            .ok_or(HistoryError::NotFound)
    }

    /// Cascade for user deletion: removes the user's analyses and their
    /// stored images.
    pub async fn purge_user(&self, user_id: Uuid) -> Result<usize, HistoryError> {
        let analyses = self.db_repo.list_analyses(user_id).await?;
        let s3_keys: Vec<String> = analyses.iter().map(|a| a.s3_key.clone()).collect();

        self.s3_service.delete_images(&s3_keys).await?;
        for analysis in &analyses {
            self.db_repo.delete_analysis(analysis.id).await?;
        }
        Ok(analyses.len())
    }
}

/// Pure pagination over an already-sorted list. `per_page` is clamped to
/// [1, MAX_PAGE_SIZE] and `page` floored at 1.
pub fn paginate<T>(items: Vec<T>, page: usize, per_page: usize) -> (Vec<T>, Pagination) {
    let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
    let page = page.max(1);
    let total = items.len();
    let pages = total.div_ceil(per_page);

    let window: Vec<T> = items
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect();

    let pagination = Pagination {
        page,
        per_page,
        total,
        pages,
        has_next: page < pages,
        has_prev: page > 1,
    };
    (window, pagination)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_page_is_clamped_to_fifty() {
        let items: Vec<u32> = (0..120).collect();
        let (window, pagination) = paginate(items, 1, 100);
        assert_eq!(pagination.per_page, MAX_PAGE_SIZE);
        assert_eq!(window.len(), MAX_PAGE_SIZE);
        assert_eq!(pagination.total, 120);
        assert_eq!(pagination.pages, 3);
    }

    #[test]
    fn flags_are_consistent_with_total_and_page() {
        let items: Vec<u32> = (0..25).collect();

        let (first, p1) = paginate(items.clone(), 1, 10);
        assert_eq!(first, (0..10).collect::<Vec<u32>>());
        assert!(p1.has_next);
        assert!(!p1.has_prev);

        let (_, p2) = paginate(items.clone(), 2, 10);
        assert!(p2.has_next);
        assert!(p2.has_prev);

        let (last, p3) = paginate(items, 3, 10);
        assert_eq!(last.len(), 5);
        assert!(!p3.has_next);
        assert!(p3.has_prev);
    }

    #[test]
    fn page_past_the_end_yields_an_empty_window() {
        let items: Vec<u32> = (0..5).collect();
        let (window, pagination) = paginate(items, 4, 10);
        assert!(window.is_empty());
        assert_eq!(pagination.pages, 1);
        assert!(!pagination.has_next);
    }

    #[test]
    fn zero_values_are_normalized() {
        let items: Vec<u32> = (0..3).collect();
        let (window, pagination) = paginate(items, 0, 0);
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.per_page, 1);
        assert_eq!(window, vec![0]);
    }

    #[test]
    fn empty_history_is_well_formed() {
        let (window, pagination) = paginate(Vec::<u32>::new(), 1, 10);
        assert!(window.is_empty());
        assert_eq!(pagination.total, 0);
        assert_eq!(pagination.pages, 0);
        assert!(!pagination.has_next);
        assert!(!pagination.has_prev);
    }
}
