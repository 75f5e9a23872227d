//! City registry queries.
//!
//! `banana` is the identity key. Zipcodes map many-to-one onto cities and
//! live in their own table so the zipcode search path never parses JSON.

use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::error::DbError;
use crate::types::{City, Vendor};

fn city_from_row(row: &Row<'_>, zipcodes: Vec<String>) -> Result<City, rusqlite::Error> {
    Ok(City {
        banana: row.get(0)?,
        name: row.get(1)?,
        state: row.get(2)?,
        vendor: Vendor::parse(&row.get::<_, String>(3)?),
        slug: row.get(4)?,
        county: row.get(5)?,
        zipcodes,
        status: row.get(6)?,
    })
}

const CITY_COLUMNS: &str = "banana, name, state, vendor, slug, county, status";

impl Database {
    /// Insert or update a city. Zipcode rows are replaced wholesale.
    pub fn upsert_city(&self, city: &City) -> Result<(), DbError> {
        self.with_transaction(|db| {
            db.conn_ref().execute(
                "INSERT INTO cities (banana, name, state, vendor, slug, county, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(banana) DO UPDATE SET
                    name = excluded.name,
                    state = excluded.state,
                    vendor = excluded.vendor,
                    slug = excluded.slug,
                    county = excluded.county,
                    status = excluded.status",
                params![
                    city.banana,
                    city.name,
                    city.state,
                    city.vendor.as_str(),
                    city.slug,
                    city.county,
                    city.status,
                ],
            )?;

            db.conn_ref().execute(
                "DELETE FROM zipcodes WHERE banana = ?1",
                params![city.banana],
            )?;
            for zipcode in &city.zipcodes {
                db.conn_ref().execute(
                    "INSERT OR IGNORE INTO zipcodes (zipcode, banana) VALUES (?1, ?2)",
                    params![zipcode, city.banana],
                )?;
            }
            Ok(())
        })
    }

    pub fn get_city(&self, banana: &str) -> Result<Option<City>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                &format!("SELECT {} FROM cities WHERE banana = ?1", CITY_COLUMNS),
                params![banana],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((banana, name, state, vendor, slug, county, status)) = row else {
            return Ok(None);
        };

        let zipcodes = self.get_city_zipcodes(&banana)?;
        Ok(Some(City {
            banana,
            name,
            state,
            vendor: Vendor::parse(&vendor),
            slug,
            county,
            zipcodes,
            status,
        }))
    }

    /// All cities with the given status, ordered by banana for deterministic
    /// sync batches.
    pub fn get_cities(&self, status: &str) -> Result<Vec<City>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {} FROM cities WHERE status = ?1 ORDER BY banana",
            CITY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status], |row| city_from_row(row, Vec::new()))?;

        let mut cities = Vec::new();
        for row in rows {
            let mut city = row?;
            city.zipcodes = self.get_city_zipcodes(&city.banana)?;
            cities.push(city);
        }
        Ok(cities)
    }

    fn get_city_zipcodes(&self, banana: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn_ref()
            .prepare("SELECT zipcode FROM zipcodes WHERE banana = ?1 ORDER BY zipcode")?;
        let rows = stmt.query_map(params![banana], |row| row.get::<_, String>(0))?;
        let mut zipcodes = Vec::new();
        for row in rows {
            zipcodes.push(row?);
        }
        Ok(zipcodes)
    }

    /// Record a completed sync attempt for activity-based scheduling.
    pub fn touch_city_last_sync(&self, banana: &str) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE cities SET last_synced_at = datetime('now') WHERE banana = ?1",
            params![banana],
        )?;
        Ok(())
    }

    /// When the city last completed a sync, if ever.
    pub fn get_city_last_sync(
        &self,
        banana: &str,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, DbError> {
        let value: Option<Option<String>> = self
            .conn_ref()
            .query_row(
                "SELECT last_synced_at FROM cities WHERE banana = ?1",
                params![banana],
                |row| row.get(0),
            )
            .optional()?;

        let Some(Some(raw)) = value else {
            return Ok(None);
        };

        // SQLite datetime('now') format
        let parsed = chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| DbError::Corrupt(format!("last_synced_at '{}': {}", raw, e)))?;
        Ok(Some(parsed.and_utc()))
    }

    /// Count of meetings for a city in the trailing window. Drives the
    /// activity-based sync gate and priority score.
    pub fn get_city_meeting_frequency(&self, banana: &str, days: i64) -> Result<i64, DbError> {
        let count: i64 = self.conn_ref().query_row(
            "SELECT COUNT(*) FROM meetings
             WHERE banana = ?1 AND date >= datetime('now', ?2)",
            params![banana, format!("-{} days", days)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::{sample_city, test_db};
    use crate::types::{banana_for, Vendor};

    #[test]
    fn test_upsert_and_get_city() {
        let db = test_db();
        let city = sample_city("paloaltoCA", Vendor::Primegov);
        db.upsert_city(&city).expect("upsert");

        let loaded = db.get_city("paloaltoCA").expect("get").expect("exists");
        assert_eq!(loaded.name, "Palo Alto");
        assert_eq!(loaded.vendor, Vendor::Primegov);
        assert_eq!(loaded.slug, "cityofpaloalto");
        assert_eq!(loaded.zipcodes, vec!["94301", "94306"]);
    }

    #[test]
    fn test_get_city_not_found() {
        let db = test_db();
        assert!(db.get_city("nowhereXX").expect("query").is_none());
    }

    #[test]
    fn test_upsert_updates_existing() {
        let db = test_db();
        let mut city = sample_city("paloaltoCA", Vendor::Primegov);
        db.upsert_city(&city).expect("first upsert");

        city.status = "inactive".to_string();
        city.zipcodes = vec!["94303".to_string()];
        db.upsert_city(&city).expect("second upsert");

        let loaded = db.get_city("paloaltoCA").expect("get").expect("exists");
        assert_eq!(loaded.status, "inactive");
        assert_eq!(loaded.zipcodes, vec!["94303"]);
    }

    #[test]
    fn test_get_cities_filters_by_status() {
        let db = test_db();
        let active = sample_city("paloaltoCA", Vendor::Primegov);
        let mut inactive = sample_city("seattleWA", Vendor::Legistar);
        inactive.name = "Seattle".to_string();
        inactive.state = "WA".to_string();
        inactive.status = "inactive".to_string();

        db.upsert_city(&active).expect("upsert active");
        db.upsert_city(&inactive).expect("upsert inactive");

        let actives = db.get_cities("active").expect("query");
        assert_eq!(actives.len(), 1);
        assert_eq!(actives[0].banana, "paloaltoCA");
    }

    #[test]
    fn test_last_sync_roundtrip() {
        let db = test_db();
        let city = sample_city("paloaltoCA", Vendor::Primegov);
        db.upsert_city(&city).expect("upsert");

        assert!(db
            .get_city_last_sync("paloaltoCA")
            .expect("query")
            .is_none());

        db.touch_city_last_sync("paloaltoCA").expect("touch");
        let last = db.get_city_last_sync("paloaltoCA").expect("query");
        assert!(last.is_some());
    }

    #[test]
    fn test_banana_matches_derivation() {
        let city = sample_city(&banana_for("Palo Alto", "CA"), Vendor::Primegov);
        assert_eq!(city.banana, "paloaltoCA");
    }
}
