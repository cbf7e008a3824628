//! End-to-end coverage of the façade against the in-memory test driver.
//! Each test opens its own `Database`, so none of these share cache state.

use std::collections::HashMap;

use sqlair::{Database, Error, SqlairType};
use sqlair_core::driver::test_driver::TestDriver;

#[derive(Default, Clone, Debug, PartialEq, SqlairType)]
struct Person {
    id: i64,
    name: String,
    #[sqlair(column = "team,omitempty")]
    team: String,
}

fn person_db() -> (TestDriver, Database<TestDriver>) {
    let driver = TestDriver::new();
    driver.define_table("person", &["id", "name", "team"]);
    let db = Database::open(&driver).unwrap();
    db.register::<Person>().unwrap();
    (driver, db)
}

#[test]
fn insert_then_get_one_round_trips() {
    let (_driver, db) = person_db();

    let insert = db.prepare("INSERT INTO person (*) VALUES ($Person.*)").unwrap();
    let alex = Person { id: 1, name: "Alex".into(), team: "Eng".into() };
    let affected = db.query(&insert).bind(&alex).unwrap().run().unwrap();
    assert_eq!(affected, 1);

    let select = db.prepare("SELECT &Person.* FROM person WHERE id = $Person.id").unwrap();
    let got: Person = db.query(&select).bind(&alex).unwrap().get_one_as().unwrap();
    assert_eq!(got, alex);
}

#[test]
fn get_one_as_errors_on_empty_table() {
    let (_driver, db) = person_db();
    let select = db.prepare("SELECT &Person.* FROM person WHERE id = $Person.id").unwrap();
    let lookup = Person { id: 1, ..Person::default() };
    let err = db.query(&select).bind(&lookup).unwrap().get_one_as::<Person>().unwrap_err();
    assert!(matches!(err, Error::NotFound));
}

#[test]
fn get_one_as_errors_on_more_than_one_row() {
    let (_driver, db) = person_db();
    let insert = db.prepare("INSERT INTO person (*) VALUES ($Person.*)").unwrap();
    let rows =
        [Person { id: 1, name: "Alex".into(), team: "Eng".into() }, Person { id: 2, name: "Sam".into(), team: "Eng".into() }];
    db.query(&insert).bind_all(&rows).unwrap().run().unwrap();

    let select = db.prepare("SELECT &Person.* FROM person WHERE id = $Person.id").unwrap();
    let lookup = Person { id: 1, ..Person::default() };
    let err = db.query(&select).bind(&lookup).unwrap().get_one_as::<Person>().unwrap_err();
    assert!(matches!(err, Error::FoundMoreThanOne));
}

#[test]
fn bulk_insert_inserts_one_row_per_element() {
    let (_driver, db) = person_db();
    let insert = db.prepare("INSERT INTO person (*) VALUES ($Person.*)").unwrap();
    let rows = [
        Person { id: 1, name: "Alex".into(), team: "Eng".into() },
        Person { id: 2, name: "Sam".into(), team: "Eng".into() },
        Person { id: 3, name: "Jo".into(), team: "Eng".into() },
    ];
    let affected = db.query(&insert).bind_all(&rows).unwrap().run().unwrap();
    assert_eq!(affected, 3);

    let all: Vec<Person> = db.query(&db.prepare("SELECT &Person.* FROM person").unwrap()).get_all_as().unwrap();
    assert_eq!(all.len(), 3);
}

/// spec.md §8 scenario 4: re-priming the same logical statement with a
/// different row count must still reach the driver successfully both times,
/// even though only the latest primed form stays in the statement cache.
#[test]
fn bulk_insert_at_different_row_counts_reuses_the_same_statement() {
    let (_driver, db) = person_db();
    let insert = db.prepare("INSERT INTO person (*) VALUES ($Person.*)").unwrap();

    let three = [
        Person { id: 1, name: "Alex".into(), team: "Eng".into() },
        Person { id: 2, name: "Sam".into(), team: "Eng".into() },
        Person { id: 3, name: "Jo".into(), team: "Eng".into() },
    ];
    let two = [
        Person { id: 4, name: "Robin".into(), team: "Eng".into() },
        Person { id: 5, name: "Lee".into(), team: "Eng".into() },
    ];

    assert_eq!(db.query(&insert).bind_all(&three).unwrap().run().unwrap(), 3);
    assert_eq!(db.query(&insert).bind_all(&two).unwrap().run().unwrap(), 2);

    let all: Vec<Person> = db.query(&db.prepare("SELECT &Person.* FROM person").unwrap()).get_all_as().unwrap();
    assert_eq!(all.len(), 5);
}

#[test]
fn single_row_insert_omits_empty_team() {
    let (_driver, db) = person_db();
    let insert = db.prepare("INSERT INTO person (*) VALUES ($Person.*)").unwrap();
    let no_team = Person { id: 1, name: "Alex".into(), team: String::new() };
    db.query(&insert).bind(&no_team).unwrap().run().unwrap();

    let select = db.prepare("SELECT &Person.* FROM person").unwrap();
    let got: Person = db.query(&select).get_one_as().unwrap();
    assert_eq!(got.team, "");
}

#[test]
fn transaction_commit_persists_rows() {
    let (_driver, db) = person_db();
    let insert = db.prepare("INSERT INTO person (*) VALUES ($Person.*)").unwrap();
    let alex = Person { id: 1, name: "Alex".into(), team: "Eng".into() };

    let tx = db.begin().unwrap();
    tx.query(&insert).bind(&alex).unwrap().run().unwrap();
    tx.commit().unwrap();

    let select = db.prepare("SELECT &Person.* FROM person").unwrap();
    let got: Person = db.query(&select).get_one_as().unwrap();
    assert_eq!(got, alex);
}

#[test]
fn dropping_a_transaction_without_commit_rolls_back() {
    let (_driver, db) = person_db();
    let insert = db.prepare("INSERT INTO person (*) VALUES ($Person.*)").unwrap();
    let alex = Person { id: 1, name: "Alex".into(), team: "Eng".into() };

    {
        let tx = db.begin().unwrap();
        tx.query(&insert).bind(&alex).unwrap().run().unwrap();
        // tx dropped here without commit
    }

    // The test driver's rollback is a no-op, but the handle itself must stay
    // usable afterwards either way: a dropped transaction should not poison
    // the connection.
    let select = db.prepare("SELECT &Person.* FROM person").unwrap();
    let _ = db.query(&select).get_all_as::<Person>().unwrap();
}

#[derive(Default, Clone, SqlairType)]
struct Ints(Vec<i64>);

#[test]
fn whole_sequence_input_binds_as_a_single_argument() {
    let (_driver, db) = person_db();
    let insert = db.prepare("INSERT INTO person (*) VALUES ($Person.*)").unwrap();
    let alex = Person { id: 1, name: "Alex".into(), team: "Eng".into() };
    db.query(&insert).bind(&alex).unwrap().run().unwrap();

    db.register::<Ints>().unwrap();
    let select = db.prepare("SELECT &Person.* FROM person WHERE id IN ($Ints[:])").unwrap();
    let ids = Ints(vec![1, 2]);
    let all: Vec<Person> = db.query(&select).bind(&ids).unwrap().get_all_as().unwrap();
    assert_eq!(all, vec![alex]);
}

#[derive(Default, Clone, SqlairType)]
struct Address {
    #[sqlair(column = "address_id")]
    id: i64,
    city: String,
}

#[derive(Default, Clone, SqlairType)]
struct Employee {
    #[sqlair(embed)]
    address: Address,
    name: String,
}

#[test]
fn embedded_record_promotes_member_tags() {
    let driver = TestDriver::new();
    driver.define_table("employee", &["address_id", "city", "name"]);
    let db = Database::open(&driver).unwrap();
    db.register::<Employee>().unwrap();

    let insert = db.prepare("INSERT INTO employee (*) VALUES ($Employee.*)").unwrap();
    let emp = Employee { address: Address { id: 7, city: "Leeds".into() }, name: "Alex".into() };
    db.query(&insert).bind(&emp).unwrap().run().unwrap();

    let select = db.prepare("SELECT &Employee.* FROM employee").unwrap();
    let got: Employee = db.query(&select).get_one_as().unwrap();
    assert_eq!(got.address.id, 7);
    assert_eq!(got.address.city, "Leeds");
    assert_eq!(got.name, "Alex");
}

#[derive(Default, Clone, SqlairType)]
struct WidgetId {
    id: i64,
}

#[derive(Default, Clone, SqlairType)]
struct Extra(HashMap<String, String>);

#[test]
fn map_star_catches_unclaimed_insert_columns_and_round_trips() {
    let driver = TestDriver::new();
    driver.define_table("widget", &["id", "color"]);
    let db = Database::open(&driver).unwrap();
    db.register::<WidgetId>().unwrap();
    db.register::<Extra>().unwrap();

    let insert =
        db.prepare("INSERT INTO widget (id, color) VALUES ($WidgetId.id, $Extra.*)").unwrap();
    let id = WidgetId { id: 1 };
    let mut extra = Extra::default();
    extra.0.insert("color".to_string(), "teal".to_string());
    db.query(&insert).bind(&id).unwrap().bind(&extra).unwrap().run().unwrap();

    let select =
        db.prepare("SELECT &WidgetId.id, &Extra.color FROM widget WHERE id = $WidgetId.id").unwrap();
    let mut got_id = WidgetId::default();
    let mut got_extra = Extra::default();
    let mut targets = sqlair::ScanTargets::new();
    targets.insert(&mut got_id);
    targets.insert(&mut got_extra);
    db.query(&select).bind(&id).unwrap().get_one(&mut targets).unwrap();

    assert_eq!(got_id.id, 1);
    assert_eq!(got_extra.0.get("color"), Some(&"teal".to_string()));
}
