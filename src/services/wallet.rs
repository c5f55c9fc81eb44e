use crate::{
    db::DbPool,
    entities::{
        wallet::{self, Entity as WalletEntity},
        wallet_transaction::{self, Entity as WalletTransactionEntity, TransactionKind},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Credits a wallet inside the caller's transaction, creating the wallet on
/// first use. The balance bump and the ledger append are inseparable: both
/// ride the same transaction or neither lands.
pub async fn credit<C: ConnectionTrait>(
    conn: &C,
    owner_id: Uuid,
    amount: Decimal,
    message: &str,
    order_id: Option<Uuid>,
) -> Result<Uuid, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "credit amount must be positive".to_string(),
        ));
    }

    let wallet_id = match find_wallet(conn, owner_id).await? {
        Some(w) => {
            WalletEntity::update_many()
                .col_expr(
                    wallet::Column::Balance,
                    Expr::col(wallet::Column::Balance).add(amount),
                )
                .col_expr(wallet::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                .filter(wallet::Column::Id.eq(w.id))
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?;
            w.id
        }
        None => {
            let model = wallet::ActiveModel {
                id: Set(Uuid::new_v4()),
                owner_id: Set(owner_id),
                balance: Set(amount),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
            };
            model.insert(conn).await.map_err(ServiceError::db_error)?.id
        }
    };

    append_entry(conn, wallet_id, amount, TransactionKind::Credit, message, order_id).await?;
    Ok(wallet_id)
}

/// Debits a wallet inside the caller's transaction.
///
/// The balance check is the UPDATE's own guard (`balance >= amount`), so two
/// concurrent spends cannot both succeed against the same funds. A missing
/// wallet is an empty wallet: `InsufficientBalance` either way.
pub async fn debit<C: ConnectionTrait>(
    conn: &C,
    owner_id: Uuid,
    amount: Decimal,
    message: &str,
    order_id: Option<Uuid>,
) -> Result<Uuid, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "debit amount must be positive".to_string(),
        ));
    }

    let wallet = find_wallet(conn, owner_id)
        .await?
        .ok_or(ServiceError::InsufficientBalance)?;

    let result = WalletEntity::update_many()
        .col_expr(
            wallet::Column::Balance,
            Expr::col(wallet::Column::Balance).sub(amount),
        )
        .col_expr(wallet::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(wallet::Column::Id.eq(wallet.id))
        .filter(wallet::Column::Balance.gte(amount))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientBalance);
    }

    append_entry(conn, wallet.id, amount, TransactionKind::Debit, message, order_id).await?;
    Ok(wallet.id)
}

async fn find_wallet<C: ConnectionTrait>(
    conn: &C,
    owner_id: Uuid,
) -> Result<Option<wallet::Model>, ServiceError> {
    WalletEntity::find()
        .filter(wallet::Column::OwnerId.eq(owner_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

async fn append_entry<C: ConnectionTrait>(
    conn: &C,
    wallet_id: Uuid,
    amount: Decimal,
    kind: TransactionKind,
    message: &str,
    order_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    let entry = wallet_transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        wallet_id: Set(wallet_id),
        amount: Set(amount),
        kind: Set(kind),
        message: Set(message.to_string()),
        order_id: Set(order_id),
        created_at: Set(Utc::now()),
    };
    entry.insert(conn).await.map_err(ServiceError::db_error)?;
    Ok(())
}

/// Wallet ledger service: append-only transaction history backing a cached
/// balance, shared by customers and vendors.
#[derive(Clone)]
pub struct WalletService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl WalletService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Credits an owner's wallet as a standalone operation.
    #[instrument(skip(self))]
    pub async fn credit(
        &self,
        owner_id: Uuid,
        amount: Decimal,
        message: &str,
        order_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let wallet_id = credit(&txn, owner_id, amount, message, order_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(%owner_id, %amount, "wallet credited");
        self.event_sender
            .send_logged(Event::WalletCredited { wallet_id, amount })
            .await;
        Ok(())
    }

    /// Debits an owner's wallet as a standalone operation.
    #[instrument(skip(self))]
    pub async fn debit(
        &self,
        owner_id: Uuid,
        amount: Decimal,
        message: &str,
        order_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let wallet_id = debit(&txn, owner_id, amount, message, order_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(%owner_id, %amount, "wallet debited");
        self.event_sender
            .send_logged(Event::WalletDebited { wallet_id, amount })
            .await;
        Ok(())
    }

    /// Current balance; a missing wallet reads as zero.
    pub async fn balance(&self, owner_id: Uuid) -> Result<Decimal, ServiceError> {
        Ok(find_wallet(&*self.db_pool, owner_id)
            .await?
            .map(|w| w.balance)
            .unwrap_or_default())
    }

    /// Wallet with its transaction history, newest first.
    #[instrument(skip(self))]
    pub async fn get_wallet(
        &self,
        owner_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Decimal, Vec<wallet_transaction::Model>, u64), ServiceError> {
        let Some(wallet) = find_wallet(&*self.db_pool, owner_id).await? else {
            return Ok((Decimal::ZERO, Vec::new(), 0));
        };

        let paginator = WalletTransactionEntity::find()
            .filter(wallet_transaction::Column::WalletId.eq(wallet.id))
            .order_by_desc(wallet_transaction::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let entries = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((wallet.balance, entries, total))
    }
}
