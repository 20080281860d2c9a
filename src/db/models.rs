use agentdb_schema::{DescriptorBuilder, Entity, EntityDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Account that owns jobs and passphrases.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    /// Plain-text password as submitted; validated but never stored.
    #[serde(skip_serializing)]
    pub password: String,
    pub email: String,
    pub is_active: bool,
    pub inserted_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            username: username.into(),
            email: email.into(),
            is_active: true,
            inserted_at: Some(now),
            updated_at: Some(now),
            ..Self::default()
        }
    }
}

static USER: LazyLock<EntityDescriptor<User>> = LazyLock::new(|| {
    DescriptorBuilder::<User>::new("ra_users")
        .identity("id", |u| &u.id, |u| &mut u.id)
        .text("username", |u| &u.username, |u| &mut u.username)
        .unique("ra_users_username_unique_index")
        .rules("required,gte=3,lte=64")
        .text("password_digest", |u| &u.password_digest, |u| &mut u.password_digest)
        .text("password", |u| &u.password, |u| &mut u.password)
        .transient()
        .rules("required")
        .text("email", |u| &u.email, |u| &mut u.email)
        .rules("required,email")
        .bool("is_active", |u| &u.is_active, |u| &mut u.is_active)
        .timestamp("inserted_at", |u| &u.inserted_at, |u| &mut u.inserted_at)
        .timestamp("updated_at", |u| &u.updated_at, |u| &mut u.updated_at)
        .build()
});

impl Entity for User {
    fn descriptor() -> &'static EntityDescriptor<Self> {
        &USER
    }
}

/// Access token issued to a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserPassphrase {
    pub id: i64,
    pub user_id: i64,
    pub passphrase: String,
    pub inserted_at: Option<DateTime<Utc>>,
}

impl UserPassphrase {
    pub fn new(user_id: i64, passphrase: impl Into<String>) -> Self {
        Self {
            user_id,
            passphrase: passphrase.into(),
            inserted_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

static USER_PASSPHRASE: LazyLock<EntityDescriptor<UserPassphrase>> = LazyLock::new(|| {
    DescriptorBuilder::<UserPassphrase>::new("ra_user_passphrases")
        .identity("id", |p| &p.id, |p| &mut p.id)
        .int("user_id", |p| &p.user_id, |p| &mut p.user_id)
        .foreign("fk_ra_user_passphrases_user_id")
        .rules("required")
        .text("passphrase", |p| &p.passphrase, |p| &mut p.passphrase)
        .unique("ra_user_passphrases_passphrase_unique_index")
        .rules("required,len=32")
        .timestamp("inserted_at", |p| &p.inserted_at, |p| &mut p.inserted_at)
        .build()
});

impl Entity for UserPassphrase {
    fn descriptor() -> &'static EntityDescriptor<Self> {
        &USER_PASSPHRASE
    }
}

/// A machine in the cluster, either the master or a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub detail: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    pub inserted_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            code: code.into(),
            node_type: "worker".to_string(),
            inserted_at: Some(now),
            updated_at: Some(now),
            ..Self::default()
        }
    }
}

static NODE: LazyLock<EntityDescriptor<Node>> = LazyLock::new(|| {
    DescriptorBuilder::<Node>::new("ra_nodes")
        .identity("id", |n| &n.id, |n| &mut n.id)
        .text("name", |n| &n.name, |n| &mut n.name)
        .rules("required,gte=3,lte=200")
        .text("code", |n| &n.code, |n| &mut n.code)
        .unique("ra_nodes_code_unique_index")
        .rules("required,gte=3,lte=200")
        .opt_text("detail", |n| &n.detail, |n| &mut n.detail)
        .text("node_type", |n| &n.node_type, |n| &mut n.node_type)
        .column("type")
        .rules("oneof=master worker")
        .timestamp("inserted_at", |n| &n.inserted_at, |n| &mut n.inserted_at)
        .timestamp("updated_at", |n| &n.updated_at, |n| &mut n.updated_at)
        .build()
});

impl Entity for Node {
    fn descriptor() -> &'static EntityDescriptor<Self> {
        &NODE
    }
}

/// User-defined background job scheduled on a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub node_id: i64,
    pub source_user_id: Option<i64>,
    pub inserted_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(node_id: i64) -> Self {
        Self {
            node_id,
            inserted_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

static JOB: LazyLock<EntityDescriptor<Job>> = LazyLock::new(|| {
    DescriptorBuilder::<Job>::new("ra_jobs")
        .identity("id", |j| &j.id, |j| &mut j.id)
        .int("node_id", |j| &j.node_id, |j| &mut j.node_id)
        .foreign("fk_ra_jobs_node_id")
        .rules("required")
        .opt_int("source_user_id", |j| &j.source_user_id, |j| &mut j.source_user_id)
        .foreign("fk_ra_jobs_source_user_id")
        .timestamp("inserted_at", |j| &j.inserted_at, |j| &mut j.inserted_at)
        .build()
});

impl Entity for Job {
    fn descriptor() -> &'static EntityDescriptor<Self> {
        &JOB
    }
}

/// Versioned definition of a job: what to run and its ordering against other jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobDetail {
    pub id: i64,
    pub node_id: i64,
    pub job_id: i64,
    pub source_user_id: Option<i64>,
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub detail: Option<String>,
    #[serde(rename = "before")]
    pub run_before: bool,
    pub before_jobs: Option<String>,
    #[serde(rename = "after")]
    pub run_after: bool,
    pub after_jobs: Option<String>,
    pub script_file: Option<String>,
    pub script: Option<String>,
    pub inserted_at: Option<DateTime<Utc>>,
}

impl JobDetail {
    pub fn new(node_id: i64, job_id: i64, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node_id,
            job_id,
            code: code.into(),
            name: name.into(),
            job_type: "other".to_string(),
            inserted_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

static JOB_DETAIL: LazyLock<EntityDescriptor<JobDetail>> = LazyLock::new(|| {
    DescriptorBuilder::<JobDetail>::new("ra_job_details")
        .identity("id", |d| &d.id, |d| &mut d.id)
        .int("node_id", |d| &d.node_id, |d| &mut d.node_id)
        .foreign("fk_ra_job_details_node_id")
        .rules("required")
        .int("job_id", |d| &d.job_id, |d| &mut d.job_id)
        .foreign("fk_ra_job_details_job_id")
        .rules("required")
        .opt_int("source_user_id", |d| &d.source_user_id, |d| &mut d.source_user_id)
        .foreign("fk_ra_job_details_source_user_id")
        .text("code", |d| &d.code, |d| &mut d.code)
        .rules("required,gte=3,lte=64")
        .text("name", |d| &d.name, |d| &mut d.name)
        .rules("required,gte=3,lte=200")
        .text("job_type", |d| &d.job_type, |d| &mut d.job_type)
        .column("type")
        .rules("oneof=new_release start restart shutdown other")
        .opt_text("detail", |d| &d.detail, |d| &mut d.detail)
        .bool("run_before", |d| &d.run_before, |d| &mut d.run_before)
        .opt_text("before_jobs", |d| &d.before_jobs, |d| &mut d.before_jobs)
        .bool("run_after", |d| &d.run_after, |d| &mut d.run_after)
        .opt_text("after_jobs", |d| &d.after_jobs, |d| &mut d.after_jobs)
        .opt_text("script_file", |d| &d.script_file, |d| &mut d.script_file)
        .opt_text("script", |d| &d.script, |d| &mut d.script)
        .timestamp("inserted_at", |d| &d.inserted_at, |d| &mut d.inserted_at)
        .build()
});

impl Entity for JobDetail {
    fn descriptor() -> &'static EntityDescriptor<Self> {
        &JOB_DETAIL
    }
}

/// Script file shipped to a node, optionally attached to a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct File {
    pub id: i64,
    pub node_id: i64,
    pub parent_id: Option<i64>,
    pub job_id: Option<i64>,
    pub dir: String,
    pub file: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub inserted_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl File {
    pub fn new(node_id: i64, dir: impl Into<String>, file: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            node_id,
            dir: dir.into(),
            file: file.into(),
            file_type: "worker".to_string(),
            inserted_at: Some(now),
            updated_at: Some(now),
            ..Self::default()
        }
    }
}

static FILE: LazyLock<EntityDescriptor<File>> = LazyLock::new(|| {
    DescriptorBuilder::<File>::new("ra_files")
        .identity("id", |f| &f.id, |f| &mut f.id)
        .int("node_id", |f| &f.node_id, |f| &mut f.node_id)
        .foreign("fk_ra_files_node_id")
        .opt_int("parent_id", |f| &f.parent_id, |f| &mut f.parent_id)
        .foreign("fk_ra_files_parent_id")
        .opt_int("job_id", |f| &f.job_id, |f| &mut f.job_id)
        .foreign("fk_ra_files_job_id")
        .text("dir", |f| &f.dir, |f| &mut f.dir)
        .rules("required")
        .text("file", |f| &f.file, |f| &mut f.file)
        .rules("required")
        .text("file_type", |f| &f.file_type, |f| &mut f.file_type)
        .column("type")
        .rules("oneof=master worker")
        .timestamp("inserted_at", |f| &f.inserted_at, |f| &mut f.inserted_at)
        .timestamp("updated_at", |f| &f.updated_at, |f| &mut f.updated_at)
        .build()
});

impl Entity for File {
    fn descriptor() -> &'static EntityDescriptor<Self> {
        &FILE
    }
}
