use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{decode_embedding, encode_embedding, parse_datetime},
        models::Employee,
    },
    identity::Gallery,
};

fn row_to_employee(row: &Row) -> Result<Employee> {
    let embedding: Vec<u8> = row.get("embedding")?;
    let created_at: String = row.get("created_at")?;

    Ok(Employee {
        id: row.get("id")?,
        name: row.get("name")?,
        embedding: decode_embedding(&embedding)?,
        face_image_path: row.get("face_image_path")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    pub async fn add_employee(
        &self,
        name: &str,
        embedding: &[f32],
        face_image_path: Option<&str>,
    ) -> Result<i64> {
        let name = name.to_string();
        let blob = encode_embedding(embedding);
        let face_image_path = face_image_path.map(str::to_string);
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO employees (name, embedding, face_image_path, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, blob, face_image_path, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to insert employee {name}"))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Removes the employee and, through the cascade, their logs.
    pub async fn delete_employee(&self, employee_id: i64) -> Result<()> {
        self.execute(move |conn| {
            let rows_affected =
                conn.execute("DELETE FROM employees WHERE id = ?1", params![employee_id])?;
            if rows_affected == 0 {
                return Err(anyhow!("Employee {employee_id} not found"));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_employee(&self, employee_id: i64) -> Result<Option<Employee>> {
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, embedding, face_image_path, created_at
                     FROM employees
                     WHERE id = ?1",
                    params![employee_id],
                    |row| Ok(row_to_employee(row)),
                )
                .optional()?;
            row.transpose()
        })
        .await
    }

    pub async fn list_employees(&self) -> Result<Vec<Employee>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, embedding, face_image_path, created_at
                 FROM employees
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut employees = Vec::new();
            while let Some(row) = rows.next()? {
                employees.push(row_to_employee(row)?);
            }
            Ok(employees)
        })
        .await
    }

    /// Build the in-memory gallery from every enrolled employee, in id order.
    pub async fn load_gallery(&self) -> Result<Gallery> {
        let employees = self.list_employees().await?;
        let mut gallery = Gallery::new();
        for employee in employees {
            gallery
                .insert(employee.name.clone(), employee.id, &employee.embedding)
                .with_context(|| format!("employee {} has an unusable embedding", employee.id))?;
        }
        Ok(gallery)
    }
}
