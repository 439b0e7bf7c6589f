//! Named response caches.
//!
//! A `ResponseCache` is a namespace inside the `responses` table. Entries are
//! keyed by method and URL, so GET and HEAD are separate entries.

use super::connection::StoreDb;
use super::hash::response_key;
use crate::Error;
use crate::http::{Request, Response, ResponseKind};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Handle to one named response cache.
#[derive(Clone, Debug)]
pub struct ResponseCache {
    db: StoreDb,
    name: String,
}

impl ResponseCache {
    pub(crate) fn new(db: StoreDb, name: &str) -> Self {
        Self { db, name: name.to_string() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the stored response for this request's method and URL.
    pub async fn match_request(&self, req: &Request) -> Result<Option<Response>, Error> {
        let store = self.name.clone();
        let key = response_key(&req.method, &req.url);
        self.db
            .conn
            .call(move |conn| -> Result<Option<Response>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT status, status_text, kind, headers_json, body
                     FROM responses WHERE store = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![store, key], |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                });

                match result {
                    Ok((status, status_text, kind, headers_json, body)) => Ok(Some(Response {
                        status,
                        status_text,
                        headers: serde_json::from_str(&headers_json)?,
                        body: body.into(),
                        kind: ResponseKind::parse(&kind),
                    })),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Store a response for this request, replacing any previous entry.
    pub async fn put(&self, req: &Request, res: &Response) -> Result<(), Error> {
        let store = self.name.clone();
        let key = response_key(&req.method, &req.url);
        let method = req.method.to_string();
        let url = req.url.clone();
        let headers_json = serde_json::to_string(&res.headers)?;
        let res = res.clone();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO responses (
                        store, key, method, url, status, status_text, kind, headers_json, body, stored_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(store, key) DO UPDATE SET
                        status = excluded.status,
                        status_text = excluded.status_text,
                        kind = excluded.kind,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![
                        store,
                        key,
                        method,
                        url,
                        res.status,
                        res.status_text,
                        res.kind.as_str(),
                        headers_json,
                        res.body.as_ref(),
                        now,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the entry for this request's method and URL.
    ///
    /// Returns true if an entry was removed.
    pub async fn delete(&self, req: &Request) -> Result<bool, Error> {
        let store = self.name.clone();
        let key = response_key(&req.method, &req.url);
        self.db
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM responses WHERE store = ?1 AND key = ?2", params![store, key])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored entries.
    #[cfg(test)]
    pub async fn len(&self) -> Result<u64, Error> {
        let store = self.name.clone();
        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM responses WHERE store = ?1", params![store], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    fn make_response(body: &'static str) -> Response {
        let mut res = Response::new(200, "OK", body);
        res.headers.push(("content-type".into(), "application/json".into()));
        res
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("app:dynamic:api:cache").await.unwrap();
        let req = Request::get("https://api.test/a");

        cache.put(&req, &make_response(r#"{"a":1}"#)).await.unwrap();

        let found = cache.match_request(&req).await.unwrap().unwrap();
        assert_eq!(found.status, 200);
        assert_eq!(found.body.as_ref(), br#"{"a":1}"#);
        assert_eq!(found.header("Content-Type"), Some("application/json"));
        assert_eq!(found.kind, ResponseKind::Basic);
    }

    #[tokio::test]
    async fn test_match_missing() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("c").await.unwrap();
        assert!(cache.match_request(&Request::get("/nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("c").await.unwrap();
        let req = Request::get("/a");

        cache.put(&req, &make_response("old")).await.unwrap();
        cache.put(&req, &make_response("new")).await.unwrap();

        let found = cache.match_request(&req).await.unwrap().unwrap();
        assert_eq!(found.body.as_ref(), b"new");
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_methods_are_separate_entries() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("c").await.unwrap();
        let get = Request::get("/a");
        let head = get.with_method(Method::Head);

        cache.put(&get, &make_response("body")).await.unwrap();
        assert!(cache.match_request(&head).await.unwrap().is_none());

        cache.put(&head, &make_response("")).await.unwrap();
        assert!(cache.delete(&get).await.unwrap());
        assert!(!cache.delete(&get).await.unwrap());
        assert!(cache.match_request(&head).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_caches_are_isolated() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let one = db.open_cache("one").await.unwrap();
        let two = db.open_cache("two").await.unwrap();
        let req = Request::get("/a");

        one.put(&req, &make_response("1")).await.unwrap();
        assert!(two.match_request(&req).await.unwrap().is_none());

        db.delete_cache("one").await.unwrap();
        assert!(one.match_request(&req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_opaque_kind_is_preserved() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("c").await.unwrap();
        let req = Request::get("https://cdn.other/lib.js");

        cache.put(&req, &Response::opaque()).await.unwrap();
        let found = cache.match_request(&req).await.unwrap().unwrap();
        assert_eq!(found.kind, ResponseKind::Opaque);
        assert_eq!(found.status, 0);
    }
}
