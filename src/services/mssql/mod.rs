//! Azure SQL (`Microsoft.Sql`).

mod managed_instance_admin;

pub use managed_instance_admin::ManagedInstanceAdminResource;
