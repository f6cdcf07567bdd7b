// SQLite flavour of schema.rs: integer keys and text timestamps

diesel::table! {
    channel_mappings (id) {
        id -> Integer,
        discord_channel -> Text,
        revolt_channel -> Text,
        discord_channel_name -> Text,
        revolt_channel_name -> Text,
        allow_bots -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}
