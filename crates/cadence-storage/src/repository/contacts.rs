//! Contact lookups. Contacts and accounts belong to the CRM; the engine only reads them.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Account, Contact, ContactWithAccount};

/// Contact repository
#[derive(Clone)]
pub struct ContactRepository {
    pool: PgPool,
}

impl ContactRepository {
    /// Create a new contact repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a contact by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<Contact>, sqlx::Error> {
        sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, account_id, first_name, last_name, email, title, phone
            FROM contacts WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get an account by ID
    pub async fn get_account(&self, id: Uuid) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            "SELECT id, name, industry, website FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get a contact and its account
    pub async fn get_with_account(
        &self,
        id: Uuid,
    ) -> Result<Option<ContactWithAccount>, sqlx::Error> {
        let Some(contact) = self.get(id).await? else {
            return Ok(None);
        };

        let account = match contact.account_id {
            Some(account_id) => self.get_account(account_id).await?,
            None => None,
        };

        Ok(Some(ContactWithAccount { contact, account }))
    }
}
