#![allow(dead_code)]

use modkit_query::FieldKind;
use modkit_query::metamodel::{EntityType, Metamodel};
use modkit_repo::FieldMap;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Set};

pub mod user {
    use sea_orm::entity::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: i64,
        pub firstname: String,
        pub lastname: String,
        pub age: i64,
        pub active: bool,
        pub nickname: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub fn metamodel() -> Metamodel {
    Metamodel::new().with(
        EntityType::new("User")
            .id("id", FieldKind::I64)
            .basic("firstname", FieldKind::String)
            .basic("lastname", FieldKind::String)
            .basic("age", FieldKind::I64)
            .basic("active", FieldKind::Bool)
            .basic("nickname", FieldKind::String),
    )
}

pub fn fields() -> FieldMap<user::Entity> {
    FieldMap::new()
        .id("id", user::Column::Id, FieldKind::I64)
        .insert("firstname", user::Column::Firstname, FieldKind::String)
        .insert("lastname", user::Column::Lastname, FieldKind::String)
        .insert("age", user::Column::Age, FieldKind::I64)
        .insert("active", user::Column::Active, FieldKind::Bool)
        .insert("nickname", user::Column::Nickname, FieldKind::String)
}

/// (id, firstname, lastname, age, active, nickname)
pub const USERS: [(i64, &str, &str, i64, bool, Option<&str>); 6] = [
    (1, "Ann", "Doe", 34, true, Some("annie")),
    (2, "Bob", "Doe", 41, false, None),
    (3, "Cid", "Roe", 19, true, Some("cid_")),
    (4, "Dee", "Moe", 27, true, None),
    (5, "Eve", "Poe", 52, false, Some("eve")),
    (6, "Fay", "Loe", 23, true, Some("50%")),
];

pub async fn setup() -> DatabaseConnection {
    let conn = Database::connect("sqlite::memory:").await.unwrap();
    conn.execute_unprepared(
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY NOT NULL,
            firstname TEXT NOT NULL,
            lastname TEXT NOT NULL,
            age INTEGER NOT NULL,
            active BOOLEAN NOT NULL,
            nickname TEXT NULL
        )",
    )
    .await
    .unwrap();
    for (id, firstname, lastname, age, active, nickname) in USERS {
        user::Entity::insert(user::ActiveModel {
            id: Set(id),
            firstname: Set(firstname.to_owned()),
            lastname: Set(lastname.to_owned()),
            age: Set(age),
            active: Set(active),
            nickname: Set(nickname.map(str::to_owned)),
        })
        .exec(&conn)
        .await
        .unwrap();
    }
    conn
}

pub fn ids(rows: &[user::Model]) -> Vec<i64> {
    rows.iter().map(|u| u.id).collect()
}
