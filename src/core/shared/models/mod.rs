pub mod core;
pub mod rbac;

pub use self::core::{
    NewOrganization, NewOrganizationMember, NewUser, NewUserPreference, Organization,
    OrganizationMember, SystemSetting, User, UserPreference,
};
pub use self::rbac::{
    NewRbacPermission, NewRbacRole, NewRbacRolePermission, NewRbacUserRole, RbacPermission,
    RbacRole,
};
