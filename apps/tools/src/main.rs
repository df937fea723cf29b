use anyhow::Result;
use clap::{Parser, Subcommand};
use shared::domain::Role;
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/orders.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create (or look up) a user; `--admin` grants order-creation rights.
    CreateUser {
        username: String,
        #[arg(long)]
        admin: bool,
    },
    ListUsers,
    ListOrders,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { username, admin } => {
            let role = if admin { Role::Admin } else { Role::User };
            let user = storage.create_user(&username, role).await?;
            println!(
                "user_id={} username={} role={:?}",
                user.user_id.0, user.username, user.role
            );
        }
        Command::ListUsers => {
            for user in storage.list_users().await? {
                println!(
                    "user_id={} username={} role={:?}",
                    user.user_id.0, user.username, user.role
                );
            }
        }
        Command::ListOrders => {
            for order in storage.list_orders().await? {
                println!(
                    "order_id={} customer={} status={} created_by={} created_at={}",
                    order.order_id.0,
                    order.customer,
                    order.status.as_str(),
                    order.created_by_username,
                    order.created_at
                );
            }
        }
    }

    Ok(())
}
