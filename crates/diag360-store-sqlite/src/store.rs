//! [`SqliteStore`]: the SQLite implementation of [`Diag360Store`].

use std::{collections::HashMap, path::Path};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use tracing::{debug, info};

use diag360_core::{
  engine::GlobalReport,
  indicator::{Category, CategoryKind, Indicator, IndicatorLink},
  score::{
    AggregatedScore, GlobalScore, IndicatorScore, ScoreBatch, ScoreDetail,
    ScoreListResponse, ScoreOrder, ScoreQuery, ScoreRun,
  },
  store::Diag360Store,
  territory::{Epci, EpciQuery},
  value::{NewRawValue, RawValue, RawValueQuery, YearSelection},
};

use crate::{
  encode::{
    axis_tables, encode_dt, encode_meta, encode_uuid, indicator_detail_from_row,
    AxisTables, RawCategory, RawEpci, RawGlobalScore, RawIndicator,
    RawIndicatorScore, RawScoreRun, RawSummary, RawValueRow, EPCI_COLUMNS,
    INDICATOR_COLUMNS, SUMMARY_COLUMNS,
  },
  schema::SCHEMA,
  Error, Result,
};

/// Page size when a query gives no limit.
const DEFAULT_LIMIT: usize = 50;

const INDICATOR_SCORE_COLUMNS: &str = "id_epci, id_indicateur, annee, \
   score_indicateur, id_besoin, score_besoin, id_objectif, score_objectif, \
   id_type, score_type, rapport";

const GLOBAL_SCORE_COLUMNS: &str = "id_epci, annee, score_global, score_besoins, \
   score_objectifs, score_types, rapport";

const RUN_COLUMNS: &str = "run_id, annee, started_at, finished_at, values_read, \
   scored, skipped_missing, skipped_rejected, global_scores, digest";

fn like_pattern(search: Option<&str>) -> Option<String> {
  search
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(|s| format!("%{}%", s.to_lowercase()))
}

fn category_select(t: AxisTables) -> String {
  format!(
    "SELECT {id}, libelle, description, categorie, ids_indicateurs, meta FROM {table}",
    id = t.id_column,
    table = t.table,
  )
}

/// Recompute every link mirror from the join tables.
///
/// Returns the number of rows whose mirror changed. Must run inside the
/// transaction that modified the join tables.
fn sync_link_mirrors(conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
  let mut changed = 0;
  for kind in CategoryKind::ALL {
    let t = axis_tables(kind);
    let (id, join, table, mirror) = (t.id_column, t.join_table, t.table, t.mirror_column);

    let categories_of = format!(
      "(SELECT json_group_array(j.{id} ORDER BY j.{id}) FROM {join} j
        WHERE j.id_indicateur = indicateur.id_indicateur)"
    );
    changed += conn.execute(
      &format!(
        "UPDATE indicateur SET {mirror} = {categories_of}
         WHERE {mirror} IS NOT {categories_of}"
      ),
      [],
    )?;

    let indicators_of = format!(
      "(SELECT json_group_array(j.id_indicateur ORDER BY j.id_indicateur) FROM {join} j
        WHERE j.{id} = {table}.{id})"
    );
    changed += conn.execute(
      &format!(
        "UPDATE {table} SET ids_indicateurs = {indicators_of}
         WHERE ids_indicateurs IS NOT {indicators_of}"
      ),
      [],
    )?;
  }
  Ok(changed)
}

fn exists(conn: &rusqlite::Connection, sql: &str, id: &str) -> rusqlite::Result<bool> {
  Ok(conn.query_row(sql, rusqlite::params![id], |_| Ok(())).optional()?.is_some())
}

/// Outcome of a link write; references are checked inside its transaction.
enum LinkWrite {
  Stored(Vec<String>),
  UnknownIndicator,
  UnknownCategory(String),
}

enum ValueWrite {
  Stored,
  UnknownEpci,
  UnknownIndicator,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Diag360 store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn resolve_year(&self, year: Option<i32>) -> Result<i32> {
    match year {
      Some(y) => Ok(y),
      None => Ok(self.latest_score_year().await?.unwrap_or(0)),
    }
  }
}

// ─── Diag360Store impl ───────────────────────────────────────────────────────

impl Diag360Store for SqliteStore {
  type Error = Error;

  // ── Territories ───────────────────────────────────────────────────────────

  async fn upsert_epci(&self, epci: Epci) -> Result<Epci> {
    let now = Utc::now();
    let epci = Epci { imported_at: Some(now), ..epci };
    let date_import = encode_dt(now);
    let meta = encode_meta(&epci.meta)?;
    let e = epci.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO epci ({EPCI_COLUMNS}) VALUES (
               ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
               ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
             ON CONFLICT(id_epci) DO UPDATE SET
               libelle                   = excluded.libelle,
               departement_code          = excluded.departement_code,
               region_code               = excluded.region_code,
               forme_juridique           = excluded.forme_juridique,
               population_commune        = excluded.population_commune,
               population_totale         = excluded.population_totale,
               surface_km2               = excluded.surface_km2,
               surface_urbanisee_km2     = excluded.surface_urbanisee_km2,
               densite_km2               = excluded.densite_km2,
               nb_departements           = excluded.nb_departements,
               nb_regions                = excluded.nb_regions,
               nb_membres                = excluded.nb_membres,
               nb_delegues               = excluded.nb_delegues,
               nb_competences            = excluded.nb_competences,
               potentiel_fiscal          = excluded.potentiel_fiscal,
               dotation_globale          = excluded.dotation_globale,
               dotation_compensation     = excluded.dotation_compensation,
               dotation_intercommunalite = excluded.dotation_intercommunalite,
               ville_siege               = excluded.ville_siege,
               source                    = excluded.source,
               date_import               = excluded.date_import,
               meta                      = excluded.meta"
          ),
          rusqlite::params![
            e.id,
            e.label,
            e.department_code,
            e.region_code,
            e.legal_form,
            e.population_communal,
            e.population_total,
            e.area_km2,
            e.urbanised_area_km2,
            e.density_per_km2,
            e.department_count,
            e.region_count,
            e.member_count,
            e.delegate_count,
            e.competence_count,
            e.fiscal_potential,
            e.grant_global,
            e.grant_compensation,
            e.grant_intercommunality,
            e.seat_city,
            e.source,
            date_import,
            meta,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(epci)
  }

  async fn get_epci(&self, id: &str) -> Result<Option<Epci>> {
    let id = id.to_owned();

    let raw: Option<RawEpci> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {EPCI_COLUMNS} FROM epci WHERE id_epci = ?1"),
            rusqlite::params![id],
            RawEpci::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawEpci::into_epci).transpose()
  }

  async fn list_epcis(&self, query: &EpciQuery) -> Result<Vec<Epci>> {
    let pattern    = like_pattern(query.search.as_deref());
    let department = query.department_code.clone();
    let limit_val  = query.limit.unwrap_or(DEFAULT_LIMIT) as i64;
    let offset_val = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawEpci> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EPCI_COLUMNS} FROM epci
           WHERE (?1 IS NULL OR lower(libelle) LIKE ?1 OR id_epci LIKE ?1)
             AND (?2 IS NULL OR departement_code = ?2)
           ORDER BY libelle, id_epci
           LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![pattern, department, limit_val, offset_val],
            RawEpci::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEpci::into_epci).collect()
  }

  async fn delete_epci(&self, id: &str) -> Result<bool> {
    let id = id.to_owned();

    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM epci WHERE id_epci = ?1", rusqlite::params![id])?)
      })
      .await?;

    Ok(deleted > 0)
  }

  // ── Indicators and categories ─────────────────────────────────────────────

  async fn upsert_indicator(&self, indicator: Indicator) -> Result<Indicator> {
    let meta = encode_meta(&indicator.meta)?;
    let i = indicator;

    let raw: RawIndicator = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO indicateur (
             id_indicateur, libelle, description, source_principale,
             url_principale, api_disponible, source_secondaire, url_secondaire,
             type_valeur, unite, meta
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
           ON CONFLICT(id_indicateur) DO UPDATE SET
             libelle           = excluded.libelle,
             description       = excluded.description,
             source_principale = excluded.source_principale,
             url_principale    = excluded.url_principale,
             api_disponible    = excluded.api_disponible,
             source_secondaire = excluded.source_secondaire,
             url_secondaire    = excluded.url_secondaire,
             type_valeur       = excluded.type_valeur,
             unite             = excluded.unite,
             meta              = excluded.meta",
          rusqlite::params![
            i.id,
            i.label,
            i.description,
            i.primary_source,
            i.primary_url,
            i.api_available,
            i.secondary_source,
            i.secondary_url,
            i.value_type,
            i.unit,
            meta,
          ],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {INDICATOR_COLUMNS} FROM indicateur WHERE id_indicateur = ?1"),
          rusqlite::params![i.id],
          RawIndicator::from_row,
        )?)
      })
      .await?;

    raw.into_indicator()
  }

  async fn get_indicator(&self, id: &str) -> Result<Option<Indicator>> {
    let id = id.to_owned();

    let raw: Option<RawIndicator> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {INDICATOR_COLUMNS} FROM indicateur WHERE id_indicateur = ?1"),
            rusqlite::params![id],
            RawIndicator::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawIndicator::into_indicator).transpose()
  }

  async fn list_indicators(&self) -> Result<Vec<Indicator>> {
    let raws: Vec<RawIndicator> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {INDICATOR_COLUMNS} FROM indicateur ORDER BY id_indicateur"
        ))?;
        let rows = stmt
          .query_map([], RawIndicator::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawIndicator::into_indicator).collect()
  }

  async fn delete_indicator(&self, id: &str) -> Result<bool> {
    let id = id.to_owned();

    let deleted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let deleted = tx.execute(
          "DELETE FROM indicateur WHERE id_indicateur = ?1",
          rusqlite::params![id],
        )?;
        sync_link_mirrors(&tx)?;
        tx.commit()?;
        Ok(deleted)
      })
      .await?;

    Ok(deleted > 0)
  }

  async fn upsert_category(&self, category: Category) -> Result<Category> {
    let t = axis_tables(category.kind);
    let meta = encode_meta(&category.meta)?;
    let c = category;

    let raw: RawCategory = self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO {table} ({id}, libelle, description, categorie, meta)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT({id}) DO UPDATE SET
               libelle     = excluded.libelle,
               description = excluded.description,
               categorie   = excluded.categorie,
               meta        = excluded.meta",
            table = t.table,
            id = t.id_column,
          ),
          rusqlite::params![c.id, c.label, c.description, c.group, meta],
        )?;
        Ok(conn.query_row(
          &format!("{} WHERE {} = ?1", category_select(t), t.id_column),
          rusqlite::params![c.id],
          |row| RawCategory::from_row(t.kind, row),
        )?)
      })
      .await?;

    raw.into_category()
  }

  async fn get_category(&self, kind: CategoryKind, id: &str) -> Result<Option<Category>> {
    let t = axis_tables(kind);
    let id = id.to_owned();

    let raw: Option<RawCategory> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("{} WHERE {} = ?1", category_select(t), t.id_column),
            rusqlite::params![id],
            |row| RawCategory::from_row(kind, row),
          )
          .optional()?)
      })
      .await?;

    raw.map(RawCategory::into_category).transpose()
  }

  async fn list_categories(&self, kind: CategoryKind) -> Result<Vec<Category>> {
    let t = axis_tables(kind);

    let raws: Vec<RawCategory> = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare(&format!("{} ORDER BY {}", category_select(t), t.id_column))?;
        let rows = stmt
          .query_map([], |row| RawCategory::from_row(kind, row))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCategory::into_category).collect()
  }

  async fn delete_category(&self, kind: CategoryKind, id: &str) -> Result<bool> {
    let t = axis_tables(kind);
    let id = id.to_owned();

    let deleted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let deleted = tx.execute(
          &format!("DELETE FROM {} WHERE {} = ?1", t.table, t.id_column),
          rusqlite::params![id],
        )?;
        sync_link_mirrors(&tx)?;
        tx.commit()?;
        Ok(deleted)
      })
      .await?;

    Ok(deleted > 0)
  }

  // ── Links ─────────────────────────────────────────────────────────────────

  async fn set_indicator_links(
    &self,
    indicator_id: &str,
    kind: CategoryKind,
    category_ids: Vec<String>,
  ) -> Result<Vec<String>> {
    let t = axis_tables(kind);
    let indicator = indicator_id.to_owned();
    let mut ids = category_ids;
    ids.sort();
    ids.dedup();

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !exists(&tx, "SELECT 1 FROM indicateur WHERE id_indicateur = ?1", &indicator)? {
          return Ok(LinkWrite::UnknownIndicator);
        }
        let category_exists =
          format!("SELECT 1 FROM {} WHERE {} = ?1", t.table, t.id_column);
        for id in &ids {
          if !exists(&tx, &category_exists, id)? {
            return Ok(LinkWrite::UnknownCategory(id.clone()));
          }
        }

        tx.execute(
          &format!("DELETE FROM {} WHERE id_indicateur = ?1", t.join_table),
          rusqlite::params![indicator],
        )?;
        {
          let mut insert = tx.prepare(&format!(
            "INSERT INTO {} (id_indicateur, {}) VALUES (?1, ?2)",
            t.join_table, t.id_column
          ))?;
          for id in &ids {
            insert.execute(rusqlite::params![indicator, id])?;
          }
        }
        sync_link_mirrors(&tx)?;
        tx.commit()?;
        Ok(LinkWrite::Stored(ids))
      })
      .await?;

    match outcome {
      LinkWrite::Stored(ids) => {
        debug!(indicator = indicator_id, %kind, links = ids.len(), "links replaced");
        Ok(ids)
      }
      LinkWrite::UnknownIndicator => Err(Error::UnknownIndicator(indicator_id.to_owned())),
      LinkWrite::UnknownCategory(id) => Err(Error::UnknownCategory { kind, id }),
    }
  }

  async fn list_links(&self) -> Result<Vec<IndicatorLink>> {
    let rows: Vec<(String, CategoryKind, String)> = self
      .conn
      .call(|conn| {
        let mut rows: Vec<(String, CategoryKind, String)> = Vec::new();
        for kind in CategoryKind::ALL {
          let t = axis_tables(kind);
          let mut stmt = conn.prepare(&format!(
            "SELECT id_indicateur, {} FROM {}",
            t.id_column, t.join_table
          ))?;
          let links = stmt
            .query_map([], |row| Ok((row.get(0)?, kind, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          rows.extend(links);
        }
        Ok(rows)
      })
      .await?;

    let mut links: Vec<IndicatorLink> = rows
      .into_iter()
      .map(|(indicator_id, kind, category_id)| IndicatorLink {
        indicator_id,
        kind,
        category_id,
      })
      .collect();
    links.sort();
    Ok(links)
  }

  async fn rebuild_link_mirrors(&self) -> Result<usize> {
    let changed = self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;
        let changed = sync_link_mirrors(&tx)?;
        tx.commit()?;
        Ok(changed)
      })
      .await?;

    if changed > 0 {
      info!(changed, "link mirrors corrected");
    }
    Ok(changed)
  }

  // ── Raw values ────────────────────────────────────────────────────────────

  async fn upsert_value(&self, input: NewRawValue) -> Result<RawValue> {
    let value = RawValue {
      epci_id:      input.epci_id,
      indicator_id: input.indicator_id,
      year:         input.year,
      value:        input.value,
      unit:         input.unit,
      source:       input.source,
      imported_at:  Utc::now(),
      meta:         input.meta,
    };
    let date_import = encode_dt(value.imported_at);
    let meta = encode_meta(&value.meta)?;
    let v = value.clone();

    let outcome = self
      .conn
      .call(move |conn| {
        if !exists(conn, "SELECT 1 FROM epci WHERE id_epci = ?1", &v.epci_id)? {
          return Ok(ValueWrite::UnknownEpci);
        }
        if !exists(conn, "SELECT 1 FROM indicateur WHERE id_indicateur = ?1", &v.indicator_id)?
        {
          return Ok(ValueWrite::UnknownIndicator);
        }
        conn.execute(
          "INSERT INTO valeur_indicateur (
             id_epci, id_indicateur, annee, valeur_brute, unite, source,
             date_import, meta
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
           ON CONFLICT(id_epci, id_indicateur, annee) DO UPDATE SET
             valeur_brute = excluded.valeur_brute,
             unite        = excluded.unite,
             source       = excluded.source,
             date_import  = excluded.date_import,
             meta         = excluded.meta",
          rusqlite::params![
            v.epci_id,
            v.indicator_id,
            v.year,
            v.value,
            v.unit,
            v.source,
            date_import,
            meta,
          ],
        )?;
        Ok(ValueWrite::Stored)
      })
      .await?;

    match outcome {
      ValueWrite::Stored => Ok(value),
      ValueWrite::UnknownEpci => Err(Error::UnknownEpci(value.epci_id)),
      ValueWrite::UnknownIndicator => Err(Error::UnknownIndicator(value.indicator_id)),
    }
  }

  async fn list_values(&self, query: &RawValueQuery) -> Result<Vec<RawValue>> {
    let epci_id      = query.epci_id.clone();
    let indicator_id = query.indicator_id.clone();
    let year         = query.year;

    let raws: Vec<RawValueRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id_epci, id_indicateur, annee, valeur_brute, unite, source,
                  date_import, meta
           FROM valeur_indicateur
           WHERE (?1 IS NULL OR id_epci = ?1)
             AND (?2 IS NULL OR id_indicateur = ?2)
             AND (?3 IS NULL OR annee = ?3)
           ORDER BY id_epci, id_indicateur, annee",
        )?;
        let rows = stmt
          .query_map(
            rusqlite::params![epci_id, indicator_id, year],
            RawValueRow::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawValueRow::into_value).collect()
  }

  // ── Scores ────────────────────────────────────────────────────────────────

  async fn replace_scores(&self, batch: ScoreBatch) -> Result<ScoreRun> {
    let year = batch.selection.year();
    let indicator_rows = batch
      .indicator_scores
      .into_iter()
      .map(|s| -> Result<_> {
        let rapport = serde_json::to_string(&s.report)?;
        Ok((s, rapport))
      })
      .collect::<Result<Vec<(IndicatorScore, String)>>>()?;
    let global_rows = batch
      .global_scores
      .into_iter()
      .map(|s| -> Result<_> {
        let rapport = serde_json::to_string(&s.report)?;
        Ok((s, rapport))
      })
      .collect::<Result<Vec<(GlobalScore, String)>>>()?;

    let run = ScoreRun { dry_run: false, ..batch.run };
    let run_id      = encode_uuid(run.run_id);
    let started_at  = encode_dt(run.started_at);
    let finished_at = encode_dt(run.finished_at);
    let counters = [
      run.values_read,
      run.scored,
      run.skipped_missing,
      run.skipped_rejected,
      run.global_scores,
    ]
    .map(|n| n as i64);
    let digest = run.digest.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        match year {
          Some(y) => {
            tx.execute("DELETE FROM score_indicateur WHERE annee = ?1", rusqlite::params![y])?;
            tx.execute("DELETE FROM score_global WHERE annee = ?1", rusqlite::params![y])?;
          }
          None => {
            tx.execute("DELETE FROM score_indicateur", [])?;
            tx.execute("DELETE FROM score_global", [])?;
          }
        }

        {
          let mut insert = tx.prepare(&format!(
            "INSERT INTO score_indicateur ({INDICATOR_SCORE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
          ))?;
          for (s, rapport) in &indicator_rows {
            insert.execute(rusqlite::params![
              s.epci_id,
              s.indicator_id,
              s.year,
              s.score,
              s.need_id,
              s.need_score,
              s.objective_id,
              s.objective_score,
              s.type_id,
              s.type_score,
              rapport,
            ])?;
          }
        }

        {
          let mut insert = tx.prepare(&format!(
            "INSERT INTO score_global ({GLOBAL_SCORE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
          ))?;
          for (g, rapport) in &global_rows {
            insert.execute(rusqlite::params![
              g.epci_id,
              g.year,
              g.score,
              g.needs_score,
              g.objectives_score,
              g.types_score,
              rapport,
            ])?;
          }
        }

        let [values_read, scored, skipped_missing, skipped_rejected, global_scores] = counters;
        tx.execute(
          &format!(
            "INSERT INTO score_run ({RUN_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
          ),
          rusqlite::params![
            run_id,
            year,
            started_at,
            finished_at,
            values_read,
            scored,
            skipped_missing,
            skipped_rejected,
            global_scores,
            digest,
          ],
        )?;

        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(run)
  }

  async fn list_indicator_scores(&self, epci_id: &str, year: i32) -> Result<Vec<IndicatorScore>> {
    let epci_id = epci_id.to_owned();

    let raws: Vec<RawIndicatorScore> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {INDICATOR_SCORE_COLUMNS} FROM score_indicateur
           WHERE id_epci = ?1 AND annee = ?2
           ORDER BY id_indicateur"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![epci_id, year], RawIndicatorScore::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawIndicatorScore::into_score).collect()
  }

  async fn list_global_scores(&self, selection: YearSelection) -> Result<Vec<GlobalScore>> {
    let year = selection.year();

    let raws: Vec<RawGlobalScore> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {GLOBAL_SCORE_COLUMNS} FROM score_global
           WHERE (?1 IS NULL OR annee = ?1)
           ORDER BY id_epci, annee"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![year], RawGlobalScore::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawGlobalScore::into_score).collect()
  }

  async fn latest_score_year(&self) -> Result<Option<i32>> {
    Ok(
      self
        .conn
        .call(|conn| {
          Ok(conn.query_row("SELECT MAX(annee) FROM score_indicateur", [], |row| {
            row.get::<_, Option<i32>>(0)
          })?)
        })
        .await?,
    )
  }

  async fn list_score_summaries(&self, query: &ScoreQuery) -> Result<ScoreListResponse> {
    let year       = self.resolve_year(query.year).await?;
    let pattern    = like_pattern(query.search.as_deref());
    let limit_val  = query.limit.unwrap_or(DEFAULT_LIMIT) as i64;
    let offset_val = query.offset.unwrap_or(0) as i64;
    let order = match query.order_by {
      ScoreOrder::Name => "libelle_epci ASC, id_epci ASC",
      ScoreOrder::Score => "score_global DESC NULLS LAST, id_epci ASC",
      ScoreOrder::Code => "id_epci ASC",
    };

    let (total, raws): (i64, Vec<RawSummary>) = self
      .conn
      .call(move |conn| {
        let filter = "annee = ?1
           AND (?2 IS NULL OR lower(libelle_epci) LIKE ?2 OR lower(id_epci) LIKE ?2)";
        let total = conn.query_row(
          &format!("SELECT COUNT(*) FROM v_score_global WHERE {filter}"),
          rusqlite::params![year, pattern],
          |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
          "SELECT {SUMMARY_COLUMNS} FROM v_score_global
           WHERE {filter}
           ORDER BY {order}
           LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![year, pattern, limit_val, offset_val],
            RawSummary::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((total, rows))
      })
      .await?;

    Ok(ScoreListResponse {
      items: raws.into_iter().map(RawSummary::into_summary).collect::<Result<_>>()?,
      total: u64::try_from(total).unwrap_or_default(),
    })
  }

  async fn get_score_detail(
    &self,
    epci_id: &str,
    year: Option<i32>,
  ) -> Result<Option<ScoreDetail>> {
    let year = self.resolve_year(year).await?;
    let epci_id = epci_id.to_owned();

    let found = self
      .conn
      .call(move |conn| {
        let summary = conn
          .query_row(
            &format!(
              "SELECT {SUMMARY_COLUMNS} FROM v_score_global
               WHERE id_epci = ?1 AND annee = ?2"
            ),
            rusqlite::params![epci_id, year],
            RawSummary::from_row,
          )
          .optional()?;
        let Some(summary) = summary else {
          return Ok(None);
        };

        let rapport: String = conn.query_row(
          "SELECT rapport FROM score_global WHERE id_epci = ?1 AND annee = ?2",
          rusqlite::params![epci_id, year],
          |row| row.get(0),
        )?;

        let mut labels: HashMap<(CategoryKind, String), String> = HashMap::new();
        for kind in CategoryKind::ALL {
          let t = axis_tables(kind);
          let mut stmt =
            conn.prepare(&format!("SELECT {}, libelle FROM {}", t.id_column, t.table))?;
          let rows = stmt.query_map([], |row| {
            Ok(((kind, row.get::<_, String>(0)?), row.get::<_, String>(1)?))
          })?;
          for row in rows {
            let (key, label) = row?;
            labels.insert(key, label);
          }
        }

        let mut stmt = conn.prepare(
          "SELECT id_indicateur, libelle_indicateur, score_indicateur,
                  id_besoin, libelle_besoin, score_besoin,
                  id_objectif, libelle_objectif, score_objectif,
                  id_type, libelle_type, score_type
           FROM v_score_indicateur
           WHERE id_epci = ?1 AND annee = ?2
           ORDER BY libelle_indicateur, id_indicateur",
        )?;
        let indicators = stmt
          .query_map(rusqlite::params![epci_id, year], indicator_detail_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some((summary, rapport, labels, indicators)))
      })
      .await?;

    let Some((summary, rapport, labels, indicators)) = found else {
      return Ok(None);
    };
    let report: GlobalReport = serde_json::from_str(&rapport)?;

    // Category scores come from the global report, ordered by label.
    let axis = |kind: CategoryKind| {
      let mut scores: Vec<AggregatedScore> = report
        .category_scores(kind)
        .iter()
        .map(|(id, score)| AggregatedScore {
          id:    id.clone(),
          label: labels.get(&(kind, id.clone())).cloned(),
          score: Some(*score),
        })
        .collect();
      scores.sort_by(|a, b| (&a.label, &a.id).cmp(&(&b.label, &b.id)));
      scores
    };

    Ok(Some(ScoreDetail {
      summary:    summary.into_summary()?,
      needs:      axis(CategoryKind::Need),
      objectives: axis(CategoryKind::Objective),
      types:      axis(CategoryKind::Type),
      indicators,
    }))
  }

  async fn list_runs(&self, limit: usize) -> Result<Vec<ScoreRun>> {
    let limit_val = limit as i64;

    let raws: Vec<RawScoreRun> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RUN_COLUMNS} FROM score_run
           ORDER BY finished_at DESC, run_id
           LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![limit_val], RawScoreRun::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawScoreRun::into_run).collect()
  }
}
