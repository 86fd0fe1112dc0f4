//! SQL schema for the Diag360 SQLite store.
//!
//! Table and column names follow the reference workbook (French). Executed
//! once at connection startup; every statement is idempotent.

/// Full schema DDL.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Reference data ──────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS epci (
    id_epci                   TEXT PRIMARY KEY,   -- SIREN
    libelle                   TEXT NOT NULL,
    departement_code          TEXT,
    region_code               TEXT,
    forme_juridique           TEXT,
    population_commune        INTEGER,
    population_totale         INTEGER,
    surface_km2               REAL,
    surface_urbanisee_km2     REAL,
    densite_km2               REAL,
    nb_departements           INTEGER,
    nb_regions                INTEGER,
    nb_membres                INTEGER,
    nb_delegues               INTEGER,
    nb_competences            INTEGER,
    potentiel_fiscal          REAL,
    dotation_globale          REAL,
    dotation_compensation     REAL,
    dotation_intercommunalite REAL,
    ville_siege               TEXT,
    source                    TEXT,
    date_import               TEXT NOT NULL,
    meta                      TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS indicateur (
    id_indicateur     TEXT PRIMARY KEY,           -- iNNN
    libelle           TEXT NOT NULL,
    description       TEXT,
    source_principale TEXT,
    url_principale    TEXT,
    api_disponible    INTEGER NOT NULL DEFAULT 0,
    source_secondaire TEXT,
    url_secondaire    TEXT,
    type_valeur       TEXT,
    unite             TEXT,
    -- Sorted JSON mirrors of the join tables.
    ids_besoins       TEXT NOT NULL DEFAULT '[]',
    ids_objectifs     TEXT NOT NULL DEFAULT '[]',
    ids_types         TEXT NOT NULL DEFAULT '[]',
    meta              TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS besoin (
    id_besoin       TEXT PRIMARY KEY,
    libelle         TEXT NOT NULL,
    description     TEXT,
    categorie       TEXT,
    ids_indicateurs TEXT NOT NULL DEFAULT '[]',
    meta            TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS objectif (
    id_objectif     TEXT PRIMARY KEY,
    libelle         TEXT NOT NULL,
    description     TEXT,
    categorie       TEXT,
    ids_indicateurs TEXT NOT NULL DEFAULT '[]',
    meta            TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS type_indicateur (
    id_type         TEXT PRIMARY KEY,
    libelle         TEXT NOT NULL,
    description     TEXT,
    categorie       TEXT,
    ids_indicateurs TEXT NOT NULL DEFAULT '[]',
    meta            TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS indicateur_besoin (
    id_indicateur TEXT NOT NULL REFERENCES indicateur(id_indicateur) ON DELETE CASCADE,
    id_besoin     TEXT NOT NULL REFERENCES besoin(id_besoin) ON DELETE CASCADE,
    UNIQUE (id_indicateur, id_besoin)
);

CREATE TABLE IF NOT EXISTS indicateur_objectif (
    id_indicateur TEXT NOT NULL REFERENCES indicateur(id_indicateur) ON DELETE CASCADE,
    id_objectif   TEXT NOT NULL REFERENCES objectif(id_objectif) ON DELETE CASCADE,
    UNIQUE (id_indicateur, id_objectif)
);

CREATE TABLE IF NOT EXISTS indicateur_type (
    id_indicateur TEXT NOT NULL REFERENCES indicateur(id_indicateur) ON DELETE CASCADE,
    id_type       TEXT NOT NULL REFERENCES type_indicateur(id_type) ON DELETE CASCADE,
    UNIQUE (id_indicateur, id_type)
);

-- ── Raw values ──────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS valeur_indicateur (
    id_epci       TEXT NOT NULL REFERENCES epci(id_epci) ON DELETE CASCADE,
    id_indicateur TEXT NOT NULL REFERENCES indicateur(id_indicateur) ON DELETE CASCADE,
    annee         INTEGER NOT NULL,               -- 0 when the source has no year
    valeur_brute  REAL,
    unite         TEXT,
    source        TEXT,
    date_import   TEXT NOT NULL,
    meta          TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (id_epci, id_indicateur, annee)
);

-- ── Scores ──────────────────────────────────────────────────────────────
-- Written only by the scoring engine, replaced wholesale per run.

CREATE TABLE IF NOT EXISTS score_indicateur (
    id_epci          TEXT NOT NULL REFERENCES epci(id_epci) ON DELETE CASCADE,
    id_indicateur    TEXT NOT NULL REFERENCES indicateur(id_indicateur) ON DELETE CASCADE,
    annee            INTEGER NOT NULL,
    score_indicateur REAL NOT NULL,
    id_besoin        TEXT,
    score_besoin     REAL,
    id_objectif      TEXT,
    score_objectif   REAL,
    id_type          TEXT,
    score_type       REAL,
    rapport          TEXT NOT NULL,
    PRIMARY KEY (id_epci, id_indicateur, annee)
);

CREATE TABLE IF NOT EXISTS score_global (
    id_epci         TEXT NOT NULL REFERENCES epci(id_epci) ON DELETE CASCADE,
    annee           INTEGER NOT NULL,
    score_global    REAL NOT NULL,
    score_besoins   REAL,
    score_objectifs REAL,
    score_types     REAL,
    rapport         TEXT NOT NULL,
    PRIMARY KEY (id_epci, annee)
);

CREATE TABLE IF NOT EXISTS score_run (
    run_id           TEXT PRIMARY KEY,
    annee            INTEGER,                     -- NULL: every year
    started_at       TEXT NOT NULL,
    finished_at      TEXT NOT NULL,
    values_read      INTEGER NOT NULL,
    scored           INTEGER NOT NULL,
    skipped_missing  INTEGER NOT NULL,
    skipped_rejected INTEGER NOT NULL,
    global_scores    INTEGER NOT NULL,
    digest           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS valeur_annee_idx      ON valeur_indicateur(annee);
CREATE INDEX IF NOT EXISTS score_indicateur_idx  ON score_indicateur(annee, id_epci);
CREATE INDEX IF NOT EXISTS score_global_annee_idx ON score_global(annee);
CREATE INDEX IF NOT EXISTS score_run_finished_idx ON score_run(finished_at);

-- ── Views ───────────────────────────────────────────────────────────────

CREATE VIEW IF NOT EXISTS v_score_indicateur AS
SELECT
    s.id_epci,
    e.libelle         AS libelle_epci,
    s.id_indicateur,
    i.libelle         AS libelle_indicateur,
    s.annee,
    s.score_indicateur,
    s.id_besoin,
    b.libelle         AS libelle_besoin,
    s.score_besoin,
    s.id_objectif,
    o.libelle         AS libelle_objectif,
    s.score_objectif,
    s.id_type,
    t.libelle         AS libelle_type,
    s.score_type
FROM score_indicateur s
JOIN epci e                 ON e.id_epci       = s.id_epci
JOIN indicateur i           ON i.id_indicateur = s.id_indicateur
LEFT JOIN besoin b          ON b.id_besoin     = s.id_besoin
LEFT JOIN objectif o        ON o.id_objectif   = s.id_objectif
LEFT JOIN type_indicateur t ON t.id_type       = s.id_type;

CREATE VIEW IF NOT EXISTS v_score_global AS
SELECT
    g.id_epci,
    e.libelle AS libelle_epci,
    e.departement_code,
    e.region_code,
    g.annee,
    g.score_global,
    g.score_besoins,
    g.score_objectifs,
    g.score_types,
    (SELECT COUNT(*) FROM score_indicateur s
      WHERE s.id_epci = g.id_epci AND s.annee = g.annee) AS nb_indicateurs,
    (SELECT MAX(r.finished_at) FROM score_run r
      WHERE r.annee IS NULL OR r.annee = g.annee)       AS date_calcul
FROM score_global g
JOIN epci e ON e.id_epci = g.id_epci;

PRAGMA user_version = 1;
";
