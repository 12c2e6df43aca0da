//! Redis GEO-backed index
//!
//! Codes live in two geo sets, `postcodes` and `outcodes`. The database is
//! chosen by the connection URL (`redis://host:6379/2`).

use std::time::Duration;

use parking_lot::Mutex;
use redis::{Client, Connection};
use tracing::info;
use wastetrack_domain::repository::GeoIndex;
use wastetrack_types::{CodeKind, DistanceUnit, Error, GeoCode, GeoPoint, Result};

use super::check_indexable;

pub struct RedisGeoIndex {
    conn: Mutex<Connection>,
}

fn index_error(e: redis::RedisError) -> Error {
    if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        Error::IndexUnavailable(e.to_string())
    } else {
        Error::Index(e.to_string())
    }
}

impl RedisGeoIndex {
    /// Connect and ping. Any failure is reported as `IndexUnavailable`.
    pub fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::IndexUnavailable(format!("invalid redis url '{url}': {e}")))?;
        let conn = client
            .get_connection_with_timeout(timeout)
            .map_err(|e| Error::IndexUnavailable(format!("cannot connect to {url}: {e}")))?;
        let index = Self {
            conn: Mutex::new(conn),
        };
        index
            .ping()
            .map_err(|e| Error::IndexUnavailable(e.to_string()))?;
        info!(url, "connected to geospatial index");
        Ok(index)
    }
}

impl GeoIndex for RedisGeoIndex {
    fn ping(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let _: String = redis::cmd("PING").query(&mut *conn).map_err(index_error)?;
        Ok(())
    }

    fn add(&self, kind: CodeKind, code: &str, point: GeoPoint) -> Result<()> {
        check_indexable(code, point)?;
        let mut conn = self.conn.lock();
        let _: i64 = redis::cmd("GEOADD")
            .arg(kind.index_key())
            .arg(point.lon)
            .arg(point.lat)
            .arg(code)
            .query(&mut *conn)
            .map_err(index_error)?;
        Ok(())
    }

    fn add_many(&self, kind: CodeKind, codes: &[GeoCode]) -> Result<usize> {
        if codes.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("GEOADD");
        cmd.arg(kind.index_key());
        for code in codes {
            check_indexable(&code.code, code.point())?;
            cmd.arg(code.lon).arg(code.lat).arg(&code.code);
        }
        let mut conn = self.conn.lock();
        let _: i64 = cmd.query(&mut *conn).map_err(index_error)?;
        Ok(codes.len())
    }

    fn query_radius(
        &self,
        kind: CodeKind,
        point: GeoPoint,
        radius: f64,
        unit: DistanceUnit,
    ) -> Result<Vec<(String, f64)>> {
        let mut conn = self.conn.lock();
        redis::cmd("GEORADIUS")
            .arg(kind.index_key())
            .arg(point.lon)
            .arg(point.lat)
            .arg(radius)
            .arg(unit.redis_arg())
            .arg("WITHDIST")
            .arg("ASC")
            .query(&mut *conn)
            .map_err(index_error)
    }

    fn lookup(&self, kind: CodeKind, code: &str) -> Result<Option<GeoPoint>> {
        let mut conn = self.conn.lock();
        let positions: Vec<Option<(f64, f64)>> = redis::cmd("GEOPOS")
            .arg(kind.index_key())
            .arg(code)
            .query(&mut *conn)
            .map_err(index_error)?;
        Ok(positions
            .into_iter()
            .next()
            .flatten()
            .map(|(lon, lat)| GeoPoint::new(lat, lon)))
    }

    fn count(&self, kind: CodeKind) -> Result<usize> {
        let mut conn = self.conn.lock();
        redis::cmd("ZCARD")
            .arg(kind.index_key())
            .query(&mut *conn)
            .map_err(index_error)
    }
}
