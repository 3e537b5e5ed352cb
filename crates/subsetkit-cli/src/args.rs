use clap::Parser;

/// Copy a referentially consistent random subset of a relational database.
#[derive(Parser, Debug)]
#[command(
    name = "subsetkit",
    about = "Copy a referentially consistent random subset of a database into an empty, schema-identical target",
    version,
    after_help = "Examples:\n  \
        subsetkit postgres://localhost/prod postgres://localhost/dev 0.05\n  \
        subsetkit postgres://localhost/prod postgres://localhost/dev 0.5 -l\n  \
        subsetkit postgres://localhost/prod postgres://localhost/dev 0.1 \\\n    \
        --full-table=plans --force=orders:42 --children=5"
)]
pub struct Cli {
    /// Source database URL (postgres://, mysql://, sqlite://). Read-only.
    pub source_url: String,

    /// Target database URL. Must already have the source's schema, empty
    /// of data.
    pub target_url: String,

    /// Fraction of each table's rows to copy, in (0, 1].
    pub fraction: f64,

    /// Use the logarithmic target-sizing formula instead of linear (§4.1).
    #[arg(short = 'l', long)]
    pub logarithmic: bool,

    /// Include this schema in addition to the default (repeatable).
    #[arg(long = "schema")]
    pub schemas: Vec<String>,

    /// Include-only table pattern, `*` wildcards allowed (repeatable).
    #[arg(short = 't', long = "table")]
    pub tables: Vec<String>,

    /// Exclude-table pattern, `*` wildcards allowed (repeatable).
    #[arg(short = 'T', long = "exclude-table")]
    pub exclude_tables: Vec<String>,

    /// Copy this table in its entirety; it is prioritized (repeatable).
    #[arg(long = "full-table")]
    pub full_tables: Vec<String>,

    /// Per-parent child-row fetch cap for non-priority rows.
    #[arg(long, default_value_t = 3)]
    pub children: i64,

    /// Force a specific row (and its descendant closure) to be copied,
    /// given as TABLE:PK (repeatable). Composite primary keys are not
    /// supported (§9 open question b).
    #[arg(long = "force")]
    pub force: Vec<String>,

    /// JSON file supplying logical foreign keys and/or table/schema
    /// include-exclude lists (§6 Config JSON), unioned with the flags above.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Buffered-insertion flush size.
    #[arg(long, default_value_t = 1000)]
    pub buffer: usize,

    /// Disable insertion buffering: flush after every row.
    #[arg(long = "no-buffer")]
    pub no_buffer: bool,

    /// Path to a JSON descriptor `{"webhook_url": "..."}` registering a
    /// `row-added` webhook subscriber — this crate's equivalent of the
    /// reference implementation's `--import=MODULE` plugin point
    /// (SPEC_FULL.md §6).
    #[arg(long = "import")]
    pub import: Option<std::path::PathBuf>,

    /// Child-expansion depth budget for forced rows, full tables, and main
    /// loop candidates alike.
    #[arg(long, default_value_t = 3)]
    pub depth: i64,

    /// Maximum candidates sampled per main-loop round, independent of a
    /// table's remaining gap.
    #[arg(long, default_value_t = 200)]
    pub batch_cap: i64,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn effective_buffer_size(&self) -> usize {
        if self.no_buffer {
            1
        } else {
            self.buffer.max(1)
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct ImportDescriptor {
    pub webhook_url: String,
}
