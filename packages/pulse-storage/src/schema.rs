pub fn render_schema(vector_dim: u32) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<VECTOR_DIM>", &vector_dim.to_string())
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"00_extensions.sql" => out.push_str(include_str!("../../../sql/00_extensions.sql")),
				"tables/001_posts.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_posts.sql")),
				"tables/002_votes.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_votes.sql")),
				"tables/003_comments.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_comments.sql")),
				"tables/004_post_embeddings.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_post_embeddings.sql")),
				"tables/005_raw_feedback_items.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_raw_feedback_items.sql")),
				"tables/006_feedback_suggestions.sql" =>
					out.push_str(include_str!("../../../sql/tables/006_feedback_suggestions.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_every_table_with_vector_dim() {
		let schema = render_schema(1_536);

		assert!(!schema.contains("\\ir "));
		assert!(schema.contains("vector(1536)"));

		for table in [
			"posts",
			"votes",
			"comments",
			"post_embeddings",
			"raw_feedback_items",
			"feedback_suggestions",
		] {
			assert!(
				schema.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
				"missing table {table}"
			);
		}
	}
}
