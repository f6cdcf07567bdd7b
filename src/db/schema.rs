diesel::table! {
    channel_mappings (id) {
        id -> BigInt,
        discord_channel -> Text,
        revolt_channel -> Text,
        discord_channel_name -> Text,
        revolt_channel_name -> Text,
        allow_bots -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
