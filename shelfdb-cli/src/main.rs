use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use shelfdb::{ArrayMatcher, Database, ErrorReport, Query, ShelfError, SortDirection};
use std::process;

/// shelfdb CLI: read and write a shelfdb data directory from the command line
#[derive(Parser)]
#[command(name = "shelfdb", version, about)]
struct Cli {
    /// Path to the data directory (default: current directory)
    #[arg(long, default_value = ".")]
    data_dir: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Get a single document by ID
    Get {
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
    },

    /// Query a collection
    Find {
        /// Collection name
        collection: String,
        /// Open a filter chain (e.g. --where "age > 16"); repeated chains must all hold
        #[arg(long = "where")]
        filters: Vec<String>,
        /// Extend the current chain with AND
        #[arg(long)]
        and: Vec<String>,
        /// Extend the current chain with OR
        #[arg(long)]
        or: Vec<String>,
        /// Only return these fields
        #[arg(long, conflicts_with = "exclude")]
        include: Vec<String>,
        /// Drop these fields
        #[arg(long)]
        exclude: Vec<String>,
        /// Sort by this field
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long, requires = "sort")]
        desc: bool,
        #[arg(long)]
        offset: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        /// Replace references at these paths with the documents they point at
        #[arg(long)]
        populate: Vec<String>,
    },

    /// Insert a new document
    Insert {
        /// Collection name
        collection: String,
        /// Document as a JSON object
        #[arg(long)]
        json: Option<String>,
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Update an existing document
    Update {
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
        /// Patch as a JSON object
        #[arg(long)]
        json: Option<String>,
        /// Field values to update (e.g. --field age=18)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a document
    Delete {
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
    },

    /// Append values to an array field
    Push {
        collection: String,
        id: String,
        /// Array field path
        field: String,
        /// JSON array of values
        values: String,
    },

    /// Remove values from an array field
    Pull {
        collection: String,
        id: String,
        /// Array field path
        field: String,
        /// JSON array of values or ids
        values: String,
    },

    /// Rewrite matching elements of an array field
    UpdateArray {
        collection: String,
        id: String,
        /// Array field path
        field: String,
        /// Match elements by this key of each update object
        #[arg(long, conflicts_with = "expr", required_unless_present = "expr")]
        key: Option<String>,
        /// Match elements with an expression (e.g. --expr "$item === 2")
        #[arg(long)]
        expr: Option<String>,
        /// JSON array of update objects or replacement values
        updates: String,
    },

    /// Show document counts and id counters per collection
    Status,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();

    let matches = Cli::command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    if let Err(e) = run(cli, &matches) {
        let report = ErrorReport::from(&e);
        match serde_json::to_string(&report) {
            Ok(line) => eprintln!("{line}"),
            Err(_) => eprintln!("{e}"),
        }
        process::exit(1);
    }
}

fn run(cli: Cli, matches: &ArgMatches) -> shelfdb::Result<()> {
    log::debug!("opening data directory {}", cli.data_dir);
    let db = Database::open(&cli.data_dir)?;

    let output = match cli.command {
        Command::Get { collection, id } => {
            let collection = db.collection(&collection)?;
            let id = collection.parse_id(&id)?;
            Value::Object(collection.find_by_id(id)?)
        }

        Command::Find {
            collection,
            filters,
            and,
            or,
            include,
            exclude,
            sort,
            desc,
            offset,
            limit,
            populate,
        } => {
            let find = matches.subcommand_matches("find");
            let mut query = Query::new();
            for (connective, expression) in ordered_filters(find, [("filters", filters), ("and", and), ("or", or)]) {
                query = match connective {
                    "and" => query.and(&expression),
                    "or" => query.or(&expression),
                    _ => query.filter(&expression),
                };
            }
            if !include.is_empty() {
                query = query.include(include);
            }
            if !exclude.is_empty() {
                query = query.exclude(exclude);
            }
            if let Some(field) = sort {
                let direction = if desc { SortDirection::Desc } else { SortDirection::Asc };
                query = query.sort(field, direction);
            }
            if let Some(offset) = offset {
                query = query.offset(offset);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            if !populate.is_empty() {
                query = query.populate(populate);
            }
            let docs = db.collection(&collection)?.find(&query)?;
            Value::Array(docs.into_iter().map(Value::Object).collect())
        }

        Command::Insert {
            collection,
            json,
            fields,
        } => {
            let data = document_input(json.as_deref(), &fields)?;
            Value::Object(db.collection(&collection)?.insert(&data)?)
        }

        Command::Update {
            collection,
            id,
            json,
            fields,
        } => {
            let collection = db.collection(&collection)?;
            let id = collection.parse_id(&id)?;
            let patch = document_input(json.as_deref(), &fields)?;
            Value::Object(collection.update_by_id(id, &patch)?)
        }

        Command::Delete { collection, id } => {
            let collection = db.collection(&collection)?;
            collection.delete_by_id(collection.parse_id(&id)?)?;
            json!({ "ok": true, "deleted": id })
        }

        Command::Push {
            collection,
            id,
            field,
            values,
        } => {
            let collection = db.collection(&collection)?;
            let id = collection.parse_id(&id)?;
            Value::Object(collection.insert_into(id, &field, json_array(&values)?)?)
        }

        Command::Pull {
            collection,
            id,
            field,
            values,
        } => {
            let collection = db.collection(&collection)?;
            let id = collection.parse_id(&id)?;
            Value::Object(collection.remove_from(id, &field, &json_array(&values)?)?)
        }

        Command::UpdateArray {
            collection,
            id,
            field,
            key,
            expr,
            updates,
        } => {
            let collection = db.collection(&collection)?;
            let id = collection.parse_id(&id)?;
            let matcher = match (key, expr) {
                (Some(key), _) => ArrayMatcher::key(key),
                (None, Some(expr)) => ArrayMatcher::expression(&expr)?,
                (None, None) => return Err(ShelfError::Query("--key or --expr is required".into())),
            };
            Value::Object(collection.update_array(id, &field, &matcher, json_array(&updates)?)?)
        }

        Command::Status => db.status()?,
    };

    print_output(&output, &cli.format)
}

/// `--where`, `--and` and `--or` values in command-line order, so chains fold the
/// way they were typed.
fn ordered_filters(
    matches: Option<&ArgMatches>,
    groups: [(&'static str, Vec<String>); 3],
) -> Vec<(&'static str, String)> {
    let mut ordered = Vec::new();
    for (id, values) in groups {
        let indices: Vec<usize> = matches
            .and_then(|m| m.indices_of(id))
            .map(|indices| indices.collect())
            .unwrap_or_default();
        for (n, value) in values.into_iter().enumerate() {
            let position = indices.get(n).copied().unwrap_or(usize::MAX);
            ordered.push((position, id, value));
        }
    }
    ordered.sort_by_key(|(position, _, _)| *position);
    ordered.into_iter().map(|(_, id, value)| (id, value)).collect()
}

fn print_output(value: &Value, format: &OutputFormat) -> shelfdb::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// Start from `--json` (if any) and overlay `--field` pairs on top.
fn document_input(json: Option<&str>, fields: &[(String, String)]) -> shelfdb::Result<Value> {
    let mut map = match json {
        Some(text) => match serde_json::from_str(text)? {
            Value::Object(map) => map,
            other => {
                return Err(ShelfError::Type {
                    field: "--json".into(),
                    message: format!("expected a JSON object, got {other}"),
                })
            }
        },
        None => Map::new(),
    };
    for (key, val) in fields {
        // Numbers, booleans, arrays and objects parse as JSON; anything else is a string.
        let value = serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.clone()));
        map.insert(key.clone(), value);
    }
    Ok(Value::Object(map))
}

fn json_array(text: &str) -> shelfdb::Result<Vec<Value>> {
    match serde_json::from_str(text)? {
        Value::Array(items) => Ok(items),
        other => Err(ShelfError::Type {
            field: "values".into(),
            message: format!("expected a JSON array, got {other}"),
        }),
    }
}
