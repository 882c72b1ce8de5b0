//! `import-machines`: bulk machine creation from a CSV export.
//!
//! Every row is validated before anything is written, and the whole import
//! runs in one transaction. Machines whose initials already exist in the
//! organization are skipped.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::Context;
use diesel::prelude::*;
use diesel::PgConnection;
use rand::distr::{Alphanumeric, SampleString};

use crate::find_organization;
use crate::schema::{locations, machine_models, machines};

const QR_CODE_LEN: usize = 12;

#[derive(Debug, serde::Deserialize)]
pub struct CsvRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Initials")]
    initials: String,
    #[serde(rename = "Model")]
    model: String,
    #[serde(rename = "Manufacturer", default)]
    manufacturer: String,
    #[serde(rename = "Year", default)]
    year: String,
    #[serde(rename = "Location")]
    location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRow {
    pub name: String,
    pub initials: String,
    pub model: String,
    pub manufacturer: Option<String>,
    pub year: Option<i32>,
    pub location: String,
}

#[derive(Insertable)]
#[diesel(table_name = locations)]
struct NewLocation<'a> {
    organization_id: i32,
    name: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = machine_models)]
struct NewModel<'a> {
    organization_id: Option<i32>,
    name: &'a str,
    manufacturer: Option<&'a str>,
    year: Option<i32>,
    is_custom: bool,
}

#[derive(Insertable)]
#[diesel(table_name = machines)]
struct NewMachine<'a> {
    organization_id: i32,
    location_id: i32,
    model_id: i32,
    name: &'a str,
    initials: &'a str,
    qr_code_id: String,
}

fn validate_row(line: usize, row: CsvRow) -> Result<MachineRow, String> {
    let name = row.name.trim();
    if name.is_empty() {
        return Err(format!("line {line}: Name is empty"));
    }
    let initials = row.initials.trim().to_ascii_uppercase();
    if !shared::is_valid_machine_initials(&initials) {
        return Err(format!(
            "line {line}: Initials '{}' must be 2-4 letters or digits",
            row.initials.trim()
        ));
    }
    let model = row.model.trim();
    if model.is_empty() {
        return Err(format!("line {line}: Model is empty"));
    }
    let location = row.location.trim();
    if location.is_empty() {
        return Err(format!("line {line}: Location is empty"));
    }
    let year = match row.year.trim() {
        "" => None,
        y => match y.parse::<i32>() {
            Ok(y) if (1930..=2100).contains(&y) => Some(y),
            _ => return Err(format!("line {line}: Year '{y}' is not a plausible year")),
        },
    };
    let manufacturer = Some(row.manufacturer.trim())
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    Ok(MachineRow {
        name: name.to_string(),
        initials,
        model: model.to_string(),
        manufacturer,
        year,
        location: location.to_string(),
    })
}

/// Validates all rows, collecting every problem rather than stopping at the first.
pub fn validate_rows(rows: Vec<CsvRow>) -> Result<Vec<MachineRow>, Vec<String>> {
    let mut errors = Vec::new();
    let mut valid = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    // Header is line 1.
    for (i, row) in rows.into_iter().enumerate() {
        let line = i + 2;
        match validate_row(line, row) {
            Ok(row) => {
                if !seen.insert(row.initials.clone()) {
                    errors.push(format!(
                        "line {line}: Initials {} appear more than once",
                        row.initials
                    ));
                } else {
                    valid.push(row);
                }
            }
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(valid)
    } else {
        Err(errors)
    }
}

pub fn parse_csv(contents: &str) -> anyhow::Result<Vec<CsvRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(contents.as_bytes());
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: CsvRow = result.context("Malformed CSV row")?;
        if row.name.trim().is_empty() && row.initials.trim().is_empty() {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// An `ilike` pattern matching `value` exactly, ignoring case.
fn literal_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn find_or_create_location(
    conn: &mut PgConnection,
    organization_id: i32,
    name: &str,
    cache: &mut HashMap<String, i32>,
) -> QueryResult<i32> {
    let key = name.to_lowercase();
    if let Some(&id) = cache.get(&key) {
        return Ok(id);
    }
    let existing: Option<i32> = locations::table
        .filter(locations::organization_id.eq(organization_id))
        .filter(locations::name.ilike(literal_pattern(name)))
        .select(locations::id)
        .first(conn)
        .optional()?;
    let id = match existing {
        Some(id) => id,
        None => {
            let id = diesel::insert_into(locations::table)
                .values(&NewLocation {
                    organization_id,
                    name,
                })
                .returning(locations::id)
                .get_result(conn)?;
            println!("  Created location: '{}' (id={})", name, id);
            id
        }
    };
    cache.insert(key, id);
    Ok(id)
}

/// Global catalog first, then the organization's own models; otherwise a
/// new custom model scoped to the organization.
fn find_or_create_model(
    conn: &mut PgConnection,
    organization_id: i32,
    row: &MachineRow,
) -> QueryResult<i32> {
    let mut query = machine_models::table
        .filter(
            machine_models::organization_id
                .is_null()
                .or(machine_models::organization_id.eq(organization_id)),
        )
        .filter(machine_models::name.ilike(literal_pattern(&row.model)))
        .into_boxed();
    if let Some(manufacturer) = &row.manufacturer {
        query = query.filter(machine_models::manufacturer.ilike(literal_pattern(manufacturer)));
    }
    if let Some(year) = row.year {
        query = query.filter(machine_models::year.eq(year));
    }
    let existing: Option<i32> = query
        .order(machine_models::is_custom.asc())
        .select(machine_models::id)
        .first(conn)
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let id = diesel::insert_into(machine_models::table)
        .values(&NewModel {
            organization_id: Some(organization_id),
            name: &row.model,
            manufacturer: row.manufacturer.as_deref(),
            year: row.year,
            is_custom: true,
        })
        .returning(machine_models::id)
        .get_result(conn)?;
    println!("  Created custom model: '{}' (id={})", row.model, id);
    Ok(id)
}

pub fn import_machines(
    conn: &mut PgConnection,
    org: &str,
    file: PathBuf,
    dry_run: bool,
) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let rows = parse_csv(&contents)?;
    if rows.is_empty() {
        println!("No machines found in CSV.");
        return Ok(());
    }

    let rows = match validate_rows(rows) {
        Ok(rows) => rows,
        Err(errors) => {
            println!("\nValidation errors:");
            for e in &errors {
                println!("  ERROR: {}", e);
            }
            anyhow::bail!("{} row(s) failed validation; nothing imported", errors.len());
        }
    };
    println!("All {} rows validated successfully.", rows.len());

    let org = find_organization(conn, org)?;
    let existing: HashSet<String> = machines::table
        .filter(machines::organization_id.eq(org.id))
        .select(machines::initials)
        .load::<String>(conn)?
        .into_iter()
        .collect();

    let (skipped, to_import): (Vec<&MachineRow>, Vec<&MachineRow>) =
        rows.iter().partition(|r| existing.contains(&r.initials));
    for row in &skipped {
        println!("  SKIP {} (initials already in use)", row.initials);
    }

    if dry_run {
        println!("\n[DRY RUN] Would import {} machines into {}.", to_import.len(), org.subdomain);
        for row in &to_import {
            println!("  {} {} @ {}", row.initials, row.name, row.location);
        }
        return Ok(());
    }

    let imported = conn.transaction::<_, anyhow::Error, _>(|conn| {
        let mut location_cache = HashMap::new();
        let mut count = 0;
        for row in &to_import {
            let location_id = find_or_create_location(conn, org.id, &row.location, &mut location_cache)?;
            let model_id = find_or_create_model(conn, org.id, row)?;
            diesel::insert_into(machines::table)
                .values(&NewMachine {
                    organization_id: org.id,
                    location_id,
                    model_id,
                    name: &row.name,
                    initials: &row.initials,
                    qr_code_id: Alphanumeric.sample_string(&mut rand::rng(), QR_CODE_LEN),
                })
                .execute(conn)?;
            count += 1;
        }
        Ok(count)
    })?;

    println!(
        "\nImported {} machines into {} ({} skipped).",
        imported,
        org.subdomain,
        skipped.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
Name,Initials,Model,Manufacturer,Year,Location
Medieval Madness,mm,Medieval Madness,Williams,1997,Main Floor
Attack from Mars,AFM,Attack from Mars,Bally,,Main Floor
";

    #[test]
    fn parses_and_normalizes_rows() {
        let rows = validate_rows(parse_csv(CSV).unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].initials, "MM");
        assert_eq!(rows[0].year, Some(1997));
        assert_eq!(rows[1].year, None);
        assert_eq!(rows[1].manufacturer.as_deref(), Some("Bally"));
    }

    #[test]
    fn collects_every_error() {
        let csv = "\
Name,Initials,Model,Manufacturer,Year,Location
Twilight Zone,TOOLONG,Twilight Zone,Bally,1993,Main
,TZ,Twilight Zone,Bally,1993,Main
Addams Family,TAF,Addams Family,Bally,19x3,Main
Addams Family 2,TAF,Addams Family,Bally,1992,
";
        let errors = validate_rows(parse_csv(csv).unwrap()).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].starts_with("line 2:"));
        assert!(errors[2].contains("19x3"));
        assert!(errors[3].contains("Location"));
    }

    #[test]
    fn duplicate_initials_in_file_are_rejected() {
        let csv = "\
Name,Initials,Model,Manufacturer,Year,Location
Medieval Madness,MM,Medieval Madness,Williams,1997,Main
Monster Bash,mm,Monster Bash,Williams,1998,Main
";
        let errors = validate_rows(parse_csv(csv).unwrap()).unwrap_err();
        assert_eq!(errors, vec!["line 3: Initials MM appear more than once".to_string()]);
    }

    #[test]
    fn name_lookups_treat_wildcards_literally() {
        assert_eq!(literal_pattern("Main Floor"), "Main Floor");
        assert_eq!(literal_pattern("Bar_1"), "Bar\\_1");
        assert_eq!(literal_pattern("100% Pinball"), "100\\% Pinball");
        assert_eq!(literal_pattern("A\\B"), "A\\\\B");
    }

    #[test]
    fn blank_rows_are_ignored() {
        let csv = "Name,Initials,Model,Manufacturer,Year,Location\n,,,,,\n";
        assert!(parse_csv(csv).unwrap().is_empty());
    }
}
