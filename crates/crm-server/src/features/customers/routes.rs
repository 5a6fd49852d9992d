//! Customer CRUD routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use sqlx::PgPool;

use super::commands::{
    create::{self, CreateCustomerCommand, CreateCustomerError},
    delete::{self, DeleteCustomerCommand, DeleteCustomerError},
    update::{self, UpdateCustomerCommand, UpdateCustomerError},
};
use super::queries::{
    get::{self as get_query, GetCustomerError, GetCustomerQuery},
    list::{self, ListCustomersError, ListCustomersQuery},
};
use crate::error::AppError;

/// CRUD routes, mounted under `/customers`.
pub fn customers_routes() -> Router<PgPool> {
    Router::new()
        .route("/", get(list_customers).post(create_customer))
        .route(
            "/:id",
            get(get_customer).patch(patch_customer).delete(delete_customer),
        )
}

async fn list_customers(
    State(db): State<PgPool>,
    Query(query): Query<ListCustomersQuery>,
) -> Result<Response, AppError> {
    let response = list::handle(db, query).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

async fn create_customer(
    State(db): State<PgPool>,
    Json(command): Json<CreateCustomerCommand>,
) -> Result<Response, AppError> {
    let record = create::handle(db, command).await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn get_customer(
    State(db): State<PgPool>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let record = get_query::handle(db, GetCustomerQuery { customer_id: id }).await?;
    Ok((StatusCode::OK, Json(record)).into_response())
}

async fn patch_customer(
    State(db): State<PgPool>,
    Path(id): Path<String>,
    Json(mut command): Json<UpdateCustomerCommand>,
) -> Result<Response, AppError> {
    command.customer_id = id;
    let record = update::handle(db, command).await?;
    Ok((StatusCode::OK, Json(record)).into_response())
}

async fn delete_customer(
    State(db): State<PgPool>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    delete::handle(db, DeleteCustomerCommand { customer_id: id }).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

impl From<CreateCustomerError> for AppError {
    fn from(err: CreateCustomerError) -> Self {
        match err {
            CreateCustomerError::IdentifierRequired => AppError::Validation(err.to_string()),
            CreateCustomerError::DuplicateCustomerId(_) | CreateCustomerError::DuplicateEmail(_) => {
                AppError::conflict(err.to_string())
            }
            CreateCustomerError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<UpdateCustomerError> for AppError {
    fn from(err: UpdateCustomerError) -> Self {
        match err {
            UpdateCustomerError::NotFound(_) => AppError::NotFound(err.to_string()),
            UpdateCustomerError::DuplicateEmail(_) => AppError::conflict(err.to_string()),
            UpdateCustomerError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<DeleteCustomerError> for AppError {
    fn from(err: DeleteCustomerError) -> Self {
        match err {
            DeleteCustomerError::NotFound(_) => AppError::NotFound(err.to_string()),
            DeleteCustomerError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<GetCustomerError> for AppError {
    fn from(err: GetCustomerError) -> Self {
        match err {
            GetCustomerError::NotFound(_) => AppError::NotFound(err.to_string()),
            GetCustomerError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<ListCustomersError> for AppError {
    fn from(err: ListCustomersError) -> Self {
        match err {
            ListCustomersError::InvalidPagination(msg) => AppError::Validation(msg.to_string()),
            ListCustomersError::Database(e) => AppError::Database(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_customers_routes_build() {
        let _router = customers_routes();
    }
}
