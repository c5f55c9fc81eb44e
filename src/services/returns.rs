use crate::{
    db::DbPool,
    entities::{
        return_item::{self, Entity as ReturnItemEntity},
        return_request::{self, Entity as ReturnRequestEntity},
    },
    errors::ServiceError,
};
use sea_orm::{
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Read side of the return lifecycle; mutations go through the return
/// commands.
#[derive(Clone)]
pub struct ReturnService {
    db_pool: Arc<DbPool>,
}

impl ReturnService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Fetches one return request with its lines, scoped to the requesting
    /// customer.
    #[instrument(skip(self))]
    pub async fn get_return(
        &self,
        customer_id: Uuid,
        return_id: Uuid,
    ) -> Result<(return_request::Model, Vec<return_item::Model>), ServiceError> {
        let request = ReturnRequestEntity::find_by_id(return_id)
            .filter(return_request::Column::CustomerId.eq(customer_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("return {return_id} not found")))?;

        let items = ReturnItemEntity::find()
            .filter(return_item::Column::ReturnId.eq(return_id))
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((request, items))
    }

    /// Paginated return history for one customer, newest first.
    #[instrument(skip(self))]
    pub async fn list_returns(
        &self,
        customer_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<(return_request::Model, Vec<return_item::Model>)>, u64), ServiceError> {
        let paginator = ReturnRequestEntity::find()
            .filter(return_request::Column::CustomerId.eq(customer_id))
            .order_by_desc(return_request::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let requests = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        let return_ids: Vec<Uuid> = requests.iter().map(|r| r.id).collect();
        let mut items_by_return: HashMap<Uuid, Vec<return_item::Model>> = HashMap::new();
        if !return_ids.is_empty() {
            let items = ReturnItemEntity::find()
                .filter(return_item::Column::ReturnId.is_in(return_ids))
                .all(&*self.db_pool)
                .await
                .map_err(ServiceError::db_error)?;
            for item in items {
                items_by_return.entry(item.return_id).or_default().push(item);
            }
        }

        let returns = requests
            .into_iter()
            .map(|r| {
                let items = items_by_return.remove(&r.id).unwrap_or_default();
                (r, items)
            })
            .collect();

        Ok((returns, total))
    }
}
