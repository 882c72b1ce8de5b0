use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::permissions::{default_member_permissions, guest_permissions};
use shared::Permission;

mod import;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("../migrations");

pub(crate) mod schema {
    diesel::table! {
        organizations (id) {
            id -> Int4,
            name -> Varchar,
            subdomain -> Varchar,
            logo_url -> Nullable<Text>,
            allow_anonymous_issues -> Bool,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        users (id) {
            id -> Int4,
            email -> Varchar,
            name -> Varchar,
            initials -> Nullable<Varchar>,
        }
    }

    diesel::table! {
        roles (id) {
            id -> Int4,
            organization_id -> Int4,
            name -> Varchar,
            is_system -> Bool,
            is_default -> Bool,
        }
    }

    diesel::table! {
        role_permissions (role_id, permission) {
            role_id -> Int4,
            permission -> Varchar,
        }
    }

    diesel::table! {
        memberships (id) {
            id -> Int4,
            user_id -> Int4,
            organization_id -> Int4,
            role_id -> Int4,
        }
    }

    diesel::table! {
        locations (id) {
            id -> Int4,
            organization_id -> Int4,
            name -> Varchar,
        }
    }

    diesel::table! {
        machine_models (id) {
            id -> Int4,
            organization_id -> Nullable<Int4>,
            name -> Varchar,
            manufacturer -> Nullable<Varchar>,
            year -> Nullable<Int4>,
            is_custom -> Bool,
        }
    }

    diesel::table! {
        machines (id) {
            id -> Int4,
            organization_id -> Int4,
            location_id -> Int4,
            model_id -> Int4,
            name -> Varchar,
            initials -> Varchar,
            qr_code_id -> Varchar,
        }
    }

    diesel::joinable!(memberships -> organizations (organization_id));
    diesel::joinable!(memberships -> roles (role_id));
    diesel::joinable!(memberships -> users (user_id));

    diesel::allow_tables_to_appear_in_same_query!(
        organizations,
        users,
        roles,
        role_permissions,
        memberships,
        locations,
        machine_models,
        machines,
    );
}

use schema::*;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "pinpoint-cli")]
#[command(about = "Admin CLI for PinPoint")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Create an organization with default roles and an admin member
    Seed {
        #[arg(long)]
        org_name: String,
        #[arg(long)]
        subdomain: String,
        #[arg(long)]
        admin_email: String,
        #[arg(long)]
        admin_name: String,
    },
    /// Create a new user
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        initials: Option<String>,
    },
    /// List all users
    ListUsers,
    /// Create an organization with default roles and no members
    CreateOrganization {
        #[arg(long)]
        name: String,
        /// Lowercase letters, digits and hyphens
        #[arg(long)]
        subdomain: String,
    },
    /// List all organizations
    ListOrganizations,
    /// Add an existing user to an organization
    AddMember {
        /// Organization subdomain
        #[arg(long)]
        org: String,
        #[arg(long)]
        email: String,
        /// Role name; defaults to the organization's default role
        #[arg(long)]
        role: Option<String>,
    },
    /// Import machines from a CSV file (Name,Initials,Model,Manufacturer,Year,Location)
    ImportMachines {
        /// Organization subdomain
        #[arg(long)]
        org: String,
        #[arg(long)]
        file: PathBuf,
        /// Parse and validate without writing to the database
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

// ============================================================================
// Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser {
    email: String,
    name: String,
    initials: Option<String>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = users)]
struct User {
    id: i32,
    email: String,
    name: String,
    initials: Option<String>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = organizations)]
pub(crate) struct Organization {
    pub id: i32,
    pub name: String,
    pub subdomain: String,
}

#[derive(Insertable)]
#[diesel(table_name = organizations)]
struct NewOrganization {
    name: String,
    subdomain: String,
}

#[derive(Insertable)]
#[diesel(table_name = roles)]
struct NewRole<'a> {
    organization_id: i32,
    name: &'a str,
    is_system: bool,
    is_default: bool,
}

#[derive(Insertable)]
#[diesel(table_name = role_permissions)]
struct NewRolePermission {
    role_id: i32,
    permission: String,
}

#[derive(Insertable)]
#[diesel(table_name = memberships)]
struct NewMembership {
    user_id: i32,
    organization_id: i32,
    role_id: i32,
}

// ============================================================================
// Commands
// ============================================================================

fn is_valid_subdomain(s: &str) -> bool {
    (1..=63).contains(&s.len())
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

fn default_initials(name: &str) -> Option<String> {
    let initials: String = name
        .split_whitespace()
        .filter_map(|w| w.chars().next())
        .flat_map(char::to_uppercase)
        .take(3)
        .collect();
    (!initials.is_empty()).then_some(initials)
}

/// Admin (system), Member (default) and Guest, with their permission rows.
/// Returns the Admin role id.
fn create_default_roles(conn: &mut PgConnection, organization_id: i32) -> QueryResult<i32> {
    let presets: [(&str, bool, bool, Vec<Permission>); 3] = [
        ("Admin", true, false, Permission::all().to_vec()),
        ("Member", false, true, default_member_permissions()),
        ("Guest", false, false, guest_permissions()),
    ];

    let mut admin_id = 0;
    for (name, is_system, is_default, permissions) in presets {
        let role_id: i32 = diesel::insert_into(roles::table)
            .values(&NewRole {
                organization_id,
                name,
                is_system,
                is_default,
            })
            .returning(roles::id)
            .get_result(conn)?;
        let rows: Vec<NewRolePermission> = permissions
            .iter()
            .map(|p| NewRolePermission {
                role_id,
                permission: p.as_str().to_string(),
            })
            .collect();
        diesel::insert_into(role_permissions::table)
            .values(&rows)
            .execute(conn)?;
        if is_system {
            admin_id = role_id;
        }
    }
    Ok(admin_id)
}

fn create_organization(
    conn: &mut PgConnection,
    name: &str,
    subdomain: &str,
) -> anyhow::Result<(Organization, i32)> {
    let subdomain = subdomain.trim().to_lowercase();
    if !is_valid_subdomain(&subdomain) {
        anyhow::bail!("Subdomain must be 1-63 lowercase letters, digits or hyphens");
    }
    let exists: i64 = organizations::table
        .filter(organizations::subdomain.eq(&subdomain))
        .count()
        .get_result(conn)?;
    if exists > 0 {
        anyhow::bail!("Organization '{}' already exists", subdomain);
    }

    let org: Organization = diesel::insert_into(organizations::table)
        .values(&NewOrganization {
            name: name.trim().to_string(),
            subdomain,
        })
        .returning(Organization::as_returning())
        .get_result(conn)?;
    let admin_role = create_default_roles(conn, org.id)?;
    Ok((org, admin_role))
}

fn find_or_create_user(conn: &mut PgConnection, email: &str, name: &str) -> QueryResult<User> {
    let email = email.trim().to_lowercase();
    if let Some(user) = users::table
        .filter(users::email.eq(&email))
        .select(User::as_select())
        .first(conn)
        .optional()?
    {
        return Ok(user);
    }
    diesel::insert_into(users::table)
        .values(&NewUser {
            email,
            name: name.to_string(),
            initials: default_initials(name),
        })
        .returning(User::as_returning())
        .get_result(conn)
}

pub(crate) fn find_organization(conn: &mut PgConnection, subdomain: &str) -> anyhow::Result<Organization> {
    organizations::table
        .filter(organizations::subdomain.eq(subdomain.trim().to_lowercase()))
        .select(Organization::as_select())
        .first(conn)
        .optional()?
        .with_context(|| format!("No organization with subdomain '{subdomain}'"))
}

fn seed(
    conn: &mut PgConnection,
    org_name: &str,
    subdomain: &str,
    admin_email: &str,
    admin_name: &str,
) -> anyhow::Result<()> {
    conn.transaction::<_, anyhow::Error, _>(|conn| {
        let (org, admin_role) = create_organization(conn, org_name, subdomain)?;
        let admin = find_or_create_user(conn, admin_email, admin_name)?;
        diesel::insert_into(memberships::table)
            .values(&NewMembership {
                user_id: admin.id,
                organization_id: org.id,
                role_id: admin_role,
            })
            .execute(conn)?;

        println!("Created organization: {} ({})", org.name, org.subdomain);
        println!("  Roles: Admin, Member (default), Guest");
        println!("  Admin: {} <{}>", admin.name, admin.email);
        Ok(())
    })
}

fn add_member(
    conn: &mut PgConnection,
    org: &str,
    email: &str,
    role: Option<&str>,
) -> anyhow::Result<()> {
    let org = find_organization(conn, org)?;
    let user: User = users::table
        .filter(users::email.eq(email.trim().to_lowercase()))
        .select(User::as_select())
        .first(conn)
        .optional()?
        .with_context(|| format!("No user with email '{email}'; create it first"))?;

    let mut role_query = roles::table
        .filter(roles::organization_id.eq(org.id))
        .into_boxed();
    role_query = match role {
        Some(name) => role_query.filter(roles::name.eq(name)),
        None => role_query.filter(roles::is_default.eq(true)),
    };
    let (role_id, role_name): (i32, String) = role_query
        .select((roles::id, roles::name))
        .first(conn)
        .optional()?
        .with_context(|| match role {
            Some(name) => format!("Organization {} has no role '{name}'", org.subdomain),
            None => format!("Organization {} has no default role", org.subdomain),
        })?;

    let inserted = diesel::insert_into(memberships::table)
        .values(&NewMembership {
            user_id: user.id,
            organization_id: org.id,
            role_id,
        })
        .on_conflict((memberships::user_id, memberships::organization_id))
        .do_nothing()
        .execute(conn)?;
    if inserted == 0 {
        anyhow::bail!("{} is already a member of {}", user.email, org.subdomain);
    }

    println!("Added {} to {} as {}", user.email, org.subdomain, role_name);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn establish_connection() -> anyhow::Result<PgConnection> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    PgConnection::establish(&database_url)
        .with_context(|| format!("Error connecting to {}", database_url))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut conn = establish_connection()?;

    match cli.command {
        Commands::Migrate => {
            let applied = conn
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("Migration failed: {e}"))?;
            if applied.is_empty() {
                println!("Database is up to date.");
            }
            for version in applied {
                println!("Applied migration {}", version);
            }
        }

        Commands::Seed {
            org_name,
            subdomain,
            admin_email,
            admin_name,
        } => seed(&mut conn, &org_name, &subdomain, &admin_email, &admin_name)?,

        Commands::CreateUser {
            email,
            name,
            initials,
        } => {
            let new_user = NewUser {
                email: email.trim().to_lowercase(),
                name: name.clone(),
                initials: initials.or_else(|| default_initials(&name)),
            };

            diesel::insert_into(users::table)
                .values(&new_user)
                .execute(&mut conn)?;

            println!("Created user: {} <{}>", name, new_user.email);
        }

        Commands::ListUsers => {
            let results: Vec<User> = users::table
                .order(users::name.asc())
                .select(User::as_select())
                .load(&mut conn)?;

            println!(
                "{:<5} {:<30} {:<30} {:<10}",
                "ID", "Name", "Email", "Initials"
            );
            println!("{}", "-".repeat(80));
            for user in results {
                println!(
                    "{:<5} {:<30} {:<30} {:<10}",
                    user.id,
                    user.name,
                    user.email,
                    user.initials.unwrap_or_default()
                );
            }
        }

        Commands::CreateOrganization { name, subdomain } => {
            let org = conn.transaction::<_, anyhow::Error, _>(|conn| {
                create_organization(conn, &name, &subdomain).map(|(org, _)| org)
            })?;
            println!("Created organization: {} ({})", org.name, org.subdomain);
        }

        Commands::ListOrganizations => {
            let orgs: Vec<Organization> = organizations::table
                .order(organizations::subdomain.asc())
                .select(Organization::as_select())
                .load(&mut conn)?;
            let member_counts: Vec<(i32, i64)> = memberships::table
                .group_by(memberships::organization_id)
                .select((memberships::organization_id, diesel::dsl::count_star()))
                .load(&mut conn)?;

            println!("{:<5} {:<20} {:<30} {:<8}", "ID", "Subdomain", "Name", "Members");
            println!("{}", "-".repeat(66));
            for org in orgs {
                let members = member_counts
                    .iter()
                    .find(|(id, _)| *id == org.id)
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                println!(
                    "{:<5} {:<20} {:<30} {:<8}",
                    org.id, org.subdomain, org.name, members
                );
            }
        }

        Commands::AddMember { org, email, role } => {
            add_member(&mut conn, &org, &email, role.as_deref())?
        }

        Commands::ImportMachines { org, file, dry_run } => {
            import::import_machines(&mut conn, &org, file, dry_run)?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_rules() {
        assert!(is_valid_subdomain("fun-zone"));
        assert!(is_valid_subdomain("arcade42"));
        assert!(!is_valid_subdomain("Fun"));
        assert!(!is_valid_subdomain("-edge"));
        assert!(!is_valid_subdomain("bad_char"));
        assert!(!is_valid_subdomain(""));
    }

    #[test]
    fn initials_from_name() {
        assert_eq!(default_initials("Tim Froehlich").as_deref(), Some("TF"));
        assert_eq!(default_initials("ada").as_deref(), Some("A"));
        assert_eq!(default_initials("   "), None);
    }
}
