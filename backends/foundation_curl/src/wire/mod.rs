pub mod curl_client;
