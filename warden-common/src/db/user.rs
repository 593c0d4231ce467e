use diesel::{dsl, BoolExpressionMethods, ExpressionMethods, QueryDsl, RunQueryDsl};
use std::time::SystemTime;
use uuid::Uuid;

use crate::db::{DaoError, DbThreadPool};
use crate::models::user::{NewUser, User};
use crate::schema::users as user_fields;
use crate::schema::users::dsl::users;

pub struct Dao {
    db_thread_pool: DbThreadPool,
}

impl Dao {
    pub fn new(db_thread_pool: &DbThreadPool) -> Self {
        Self {
            db_thread_pool: db_thread_pool.clone(),
        }
    }

    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        auth_string_hash: &str,
    ) -> Result<Uuid, DaoError> {
        let new_user = NewUser {
            id: Uuid::now_v7(),
            username,
            email,
            auth_string_hash,
            is_active: true,
            created_at: SystemTime::now(),
        };

        dsl::insert_into(users)
            .values(&new_user)
            .execute(&mut self.db_thread_pool.get()?)?;

        Ok(new_user.id)
    }

    /// Account lookup for the reset-request step. The caller may hold
    /// either an email address or a username.
    pub fn get_user_by_login(&self, login: &str) -> Result<User, DaoError> {
        Ok(users
            .filter(
                user_fields::email
                    .eq(login)
                    .or(user_fields::username.eq(login)),
            )
            .first::<User>(&mut self.db_thread_pool.get()?)?)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User, DaoError> {
        Ok(users
            .filter(user_fields::email.eq(email))
            .first::<User>(&mut self.db_thread_pool.get()?)?)
    }

    pub fn get_user_by_id(&self, user_id: Uuid) -> Result<User, DaoError> {
        Ok(users
            .find(user_id)
            .first::<User>(&mut self.db_thread_pool.get()?)?)
    }

    pub fn rotate_auth_string_hash(
        &self,
        user_id: Uuid,
        new_auth_string_hash: &str,
    ) -> Result<(), DaoError> {
        let affected_row_count = dsl::update(users.find(user_id))
            .set(user_fields::auth_string_hash.eq(new_auth_string_hash))
            .execute(&mut self.db_thread_pool.get()?)?;

        if affected_row_count == 0 {
            return Err(DaoError::QueryFailure(diesel::result::Error::NotFound));
        }

        Ok(())
    }
}
